//! Get client for passive agent checks.
//!
//! One key per round-trip. Agents since [`FRAMED_GET_SINCE`] take a framed
//! request; older ones take the bare key terminated by a newline and answer
//! until they close the connection.

use std::fmt;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::config::GetConfig;
use crate::error::{Error, Result};
use crate::payload::AgentResponse;
use crate::transport::{Connection, Connector, Limits, TcpConnector, connect};
use crate::version::Version;

/// First agent release that expects a framed get request.
pub const FRAMED_GET_SINCE: Version = Version::release(4, 0);

/// Progress of a single get round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetState {
    Idle,
    Connecting,
    Sent,
    AwaitingResponse,
    Done,
    Failed,
}

impl fmt::Display for GetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GetState::Idle => "idle",
            GetState::Connecting => "connecting",
            GetState::Sent => "sent",
            GetState::AwaitingResponse => "awaiting response",
            GetState::Done => "done",
            GetState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Progress<'k> {
    key: &'k str,
    state: GetState,
}

impl<'k> Progress<'k> {
    fn new(key: &'k str) -> Self {
        Self {
            key,
            state: GetState::Idle,
        }
    }

    fn advance(&mut self, next: GetState) {
        tracing::trace!("get {}: {} -> {}", self.key, self.state, next);
        self.state = next;
    }

    /// An unsupported key ends the round-trip as `Failed`, though the caller
    /// still receives it as an `Ok` outcome.
    fn finish(&mut self, result: Result<AgentResponse>) -> Result<AgentResponse> {
        self.advance(match &result {
            Ok(AgentResponse::Value(_)) => GetState::Done,
            Ok(AgentResponse::NotSupported { .. }) | Err(_) => GetState::Failed,
        });
        result
    }
}

/// Client for the get protocol
#[derive(Debug, Clone)]
pub struct Getter<C = TcpConnector> {
    config: GetConfig,
    connector: C,
}

impl Getter<TcpConnector> {
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: GetConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.source_ip);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Getter<C> {
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn with_connector(config: GetConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, connector })
    }

    #[must_use]
    pub fn config(&self) -> &GetConfig {
        &self.config
    }

    fn framed(&self) -> bool {
        self.config
            .peer_version
            .is_none_or(|v| v >= FRAMED_GET_SINCE)
    }

    /// Request one key. An unsupported key is an `Ok` outcome.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty key, and transport or protocol
    /// errors for a failed round-trip.
    pub async fn get(&self, key: &str) -> Result<AgentResponse> {
        self.get_with_cancel(key, &CancellationToken::new()).await
    }

    /// Request one key and return its value.
    ///
    /// # Errors
    ///
    /// As [`Getter::get`], plus `Error::NotSupported` when the agent rejects
    /// the key.
    pub async fn get_value(&self, key: &str) -> Result<String> {
        match self.get(key).await? {
            AgentResponse::Value(value) => Ok(value),
            AgentResponse::NotSupported { reason } => Err(Error::NotSupported {
                key: key.to_string(),
                reason,
            }),
        }
    }

    /// # Errors
    ///
    /// As [`Getter::get`], or `ProtocolError::Cancelled` when cancelled.
    pub async fn get_with_cancel(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        if key.is_empty() || key.contains('\n') {
            return Err(Error::config(format!("invalid item key: {key:?}")));
        }

        let mut progress = Progress::new(key);
        let result = self.round_trip(key, &mut progress, cancel).await;
        progress.finish(result)
    }

    async fn round_trip(
        &self,
        key: &str,
        progress: &mut Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse> {
        let limits = Limits {
            timeout: self.config.timeout(),
            max_frame_size: self.config.max_frame_size,
            variant: self.config.header_variant(),
        };

        progress.advance(GetState::Connecting);
        let stream = connect(&self.connector, &self.config.node, limits.timeout, cancel).await?;
        let mut conn = Connection::new(stream, limits);

        let body = if self.framed() {
            conn.send(Bytes::copy_from_slice(key.as_bytes()), cancel)
                .await?;
            progress.advance(GetState::Sent);
            progress.advance(GetState::AwaitingResponse);
            conn.receive(cancel).await?.payload
        } else {
            conn.send_raw(format!("{key}\n").as_bytes(), cancel).await?;
            progress.advance(GetState::Sent);
            progress.advance(GetState::AwaitingResponse);
            conn.receive_raw(cancel).await?
        };

        let response = AgentResponse::parse(&body);
        tracing::debug!(
            "get {} from {}: {}",
            key,
            self.config.node,
            if response.is_supported() {
                "ok"
            } else {
                "not supported"
            }
        );
        Ok(response)
    }
}
