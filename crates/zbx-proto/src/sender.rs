//! Sender (trapper) client.
//!
//! A batch is cut into chunks and each chunk is pushed to every configured
//! cluster in its own round-trip. Within a cluster the nodes are tried in
//! order until one accepts the connection. A chunk that cannot be delivered
//! is reported with all of its records failed and the batch carries on.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;

use crate::aggregate::{ChunkReport, SendResult, aggregate};
use crate::chunk::{Chunk, chunk};
use crate::config::{Node, SenderConfig};
use crate::error::{Error, ProtocolError, Result};
use crate::item::{ItemValue, Value};
use crate::payload::{ChunkResponse, from_payload, to_payload, to_payload_at};
use crate::transport::{Connection, Connector, Limits, TcpConnector, connect_any};

/// Client for the sender protocol
#[derive(Debug, Clone)]
pub struct Sender<C = TcpConnector> {
    config: SenderConfig,
    connector: C,
}

impl Sender<TcpConnector> {
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn new(config: SenderConfig) -> Result<Self> {
        let connector = TcpConnector::new(config.source_ip);
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> Sender<C> {
    /// # Errors
    ///
    /// Returns `Error::Config` if the configuration is invalid.
    pub fn with_connector(config: SenderConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, connector })
    }

    #[must_use]
    pub fn config(&self) -> &SenderConfig {
        &self.config
    }

    fn limits(&self) -> Limits {
        Limits {
            timeout: self.config.timeout(),
            max_frame_size: self.config.max_frame_size,
            variant: self.config.header_variant(),
        }
    }

    /// Send a batch of records.
    ///
    /// Delivery failures are reported per chunk in the result, never as an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unusable configuration.
    pub async fn send(&self, records: &[ItemValue]) -> Result<SendResult> {
        self.send_with_cancel(records, &CancellationToken::new())
            .await
    }

    /// Send a single value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `host` or `key` is empty.
    pub async fn send_value(
        &self,
        host: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<SendResult> {
        let item = ItemValue::new(host, key, value)?;
        self.send(std::slice::from_ref(&item)).await
    }

    /// Like [`Sender::send`], stopping at the next suspension point once
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unusable configuration, or
    /// `ProtocolError::Cancelled` when cancelled.
    pub async fn send_with_cancel(
        &self,
        records: &[ItemValue],
        cancel: &CancellationToken,
    ) -> Result<SendResult> {
        let chunks = chunk(records, self.config.chunk_size)?;
        let mut reports = Vec::with_capacity(chunks.len() * self.config.clusters.len());

        tracing::debug!(
            "Sending {} records in {} chunk(s) to {} cluster(s)",
            records.len(),
            chunks.len(),
            self.config.clusters.len()
        );

        for chunk in chunks {
            for cluster in &self.config.clusters {
                let report = match self.send_chunk(&chunk, cluster, cancel).await {
                    Ok((response, node)) => {
                        tracing::debug!(
                            "Chunk {} delivered to {}: {} processed, {} failed",
                            response.chunk,
                            node,
                            response.processed,
                            response.failed
                        );
                        ChunkReport::delivered(response).with_node(node.to_string())
                    }
                    Err(e @ Error::Protocol(ProtocolError::Cancelled)) => return Err(e),
                    Err(e) => {
                        tracing::warn!("Chunk {} failed: {}", chunk.number, e);
                        ChunkReport::failed(chunk.number, chunk.len(), &e)
                            .with_node(cluster_label(cluster))
                    }
                };
                reports.push(report);
            }
        }

        Ok(aggregate(reports))
    }

    async fn send_chunk<'n>(
        &self,
        chunk: &Chunk<'_>,
        cluster: &'n [Node],
        cancel: &CancellationToken,
    ) -> Result<(ChunkResponse, &'n Node)> {
        let payload = if self.config.request_clock {
            to_payload_at(chunk.items, Some(now()))?
        } else {
            to_payload(chunk.items)?
        };

        let limits = self.limits();
        let (stream, node) = connect_any(&self.connector, cluster, limits.timeout, cancel).await?;

        let mut conn = Connection::new(stream, limits);
        let frame = conn.exchange(payload, cancel).await?;
        let reply = from_payload(&frame.payload)?;

        Ok((reply.into_chunk_response(chunk.number), node))
    }
}

fn cluster_label(cluster: &[Node]) -> String {
    cluster
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

fn now() -> (i64, i32) {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (
        i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        i32::try_from(elapsed.subsec_nanos()).unwrap_or(0),
    )
}
