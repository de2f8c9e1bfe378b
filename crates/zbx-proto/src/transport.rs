//! Connection transport.
//!
//! Every round-trip opens its own connection, writes one request, reads one
//! reply and drops the connection. Each phase runs under the configured
//! timeout and can be cancelled through a [`CancellationToken`].

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::Node;
use crate::error::{Error, ProtocolError, Result, TransportError};
use crate::frame::{Frame, FrameCodec, HEADER_SIZE, HeaderVariant, MAGIC, decode_frame};

/// Opens a byte stream to a node.
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    fn connect(&self, node: &Node) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP, optionally bound to a local source address.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    source_ip: Option<IpAddr>,
}

impl TcpConnector {
    #[must_use]
    pub fn new(source_ip: Option<IpAddr>) -> Self {
        Self { source_ip }
    }

    async fn connect_addr(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        let Some(source) = self.source_ip else {
            return TcpStream::connect(addr).await;
        };

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(SocketAddr::new(source, 0))?;
        socket.connect(addr).await
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, node: &Node) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in tokio::net::lookup_host((node.host.as_str(), node.port)).await? {
            match self.connect_addr(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no addresses for {node}"))
        }))
    }
}

/// Run `fut` under a deadline, abandoning it if `cancel` fires first.
pub(crate) async fn guarded<F, T>(fut: F, limit: Duration, cancel: &CancellationToken) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ProtocolError::Cancelled.into()),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(TransportError::Timeout(limit).into()),
        },
    }
}

/// Connect to a single node.
///
/// # Errors
///
/// Returns `TransportError::Connect`, `TransportError::Timeout` or
/// `ProtocolError::Cancelled`.
pub async fn connect<C: Connector>(
    connector: &C,
    node: &Node,
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<C::Stream> {
    tracing::debug!("Connecting to {}", node);

    guarded(
        async {
            connector.connect(node).await.map_err(|source| {
                Error::Transport(TransportError::Connect {
                    addr: node.to_string(),
                    source,
                })
            })
        },
        limit,
        cancel,
    )
    .await
}

/// Connect to the first node of `nodes` that accepts.
///
/// # Errors
///
/// Returns the last node's error when every node fails, `Error::Config` for an
/// empty list, or `ProtocolError::Cancelled` as soon as `cancel` fires.
pub async fn connect_any<'n, C: Connector>(
    connector: &C,
    nodes: &'n [Node],
    limit: Duration,
    cancel: &CancellationToken,
) -> Result<(C::Stream, &'n Node)> {
    let mut last_err = None;

    for node in nodes {
        match connect(connector, node, limit, cancel).await {
            Ok(stream) => return Ok((stream, node)),
            Err(e @ Error::Protocol(ProtocolError::Cancelled)) => return Err(e),
            Err(e) => {
                tracing::warn!("Node {} unavailable: {}", node, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::config("no nodes to connect to")))
}

/// Settings shared by every phase of a round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub max_frame_size: u64,
    pub variant: HeaderVariant,
}

/// One open round-trip.
pub struct Connection<S> {
    framed: Framed<S, FrameCodec>,
    limits: Limits,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, limits: Limits) -> Self {
        let codec = FrameCodec::new(limits.variant).with_max_frame_size(limits.max_frame_size);
        Self {
            framed: Framed::new(stream, codec),
            limits,
        }
    }

    /// Write one framed request.
    ///
    /// # Errors
    ///
    /// Returns transport, timeout or cancellation errors.
    pub async fn send(&mut self, payload: Bytes, cancel: &CancellationToken) -> Result<()> {
        let framed = &mut self.framed;
        guarded(
            async { framed.send(payload).await.map_err(Error::from) },
            self.limits.timeout,
            cancel,
        )
        .await
    }

    /// Read one framed reply.
    ///
    /// The peer closing before a whole frame arrived, or sending bytes past
    /// the declared length, is `ProtocolError::Truncated`.
    ///
    /// # Errors
    ///
    /// Returns protocol, transport, timeout or cancellation errors.
    pub async fn receive(&mut self, cancel: &CancellationToken) -> Result<Frame> {
        let framed = &mut self.framed;
        let frame = guarded(
            async {
                match framed.next().await {
                    Some(frame) => frame.map_err(Error::from),
                    None => Err(ProtocolError::Truncated {
                        expected: HEADER_SIZE as u64,
                        actual: 0,
                    }
                    .into()),
                }
            },
            self.limits.timeout,
            cancel,
        )
        .await?;

        let surplus = self.framed.read_buffer().len();
        if surplus > 0 {
            return Err(ProtocolError::Truncated {
                expected: frame.payload.len() as u64,
                actual: (frame.payload.len() + surplus) as u64,
            }
            .into());
        }

        tracing::trace!("Received {} byte payload", frame.payload.len());
        Ok(frame)
    }

    /// Write a request, read the reply.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`] and [`Connection::receive`].
    pub async fn exchange(&mut self, payload: Bytes, cancel: &CancellationToken) -> Result<Frame> {
        self.send(payload, cancel).await?;
        self.receive(cancel).await
    }

    /// Write unframed bytes, for peers that predate framing.
    ///
    /// # Errors
    ///
    /// Returns transport, timeout or cancellation errors.
    pub async fn send_raw(&mut self, bytes: &[u8], cancel: &CancellationToken) -> Result<()> {
        let stream = self.framed.get_mut();
        guarded(
            async {
                stream.write_all(bytes).await?;
                stream.flush().await?;
                Ok(())
            },
            self.limits.timeout,
            cancel,
        )
        .await
    }

    /// Read an unframed reply until the peer closes. A reply that does start
    /// with a frame header is decoded as a frame.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::Oversize` past the frame ceiling, or transport,
    /// timeout or cancellation errors.
    pub async fn receive_raw(&mut self, cancel: &CancellationToken) -> Result<Bytes> {
        let max = self.limits.max_frame_size;
        let mut body = BytesMut::from(&self.framed.read_buffer()[..]);
        let stream = self.framed.get_mut();

        guarded(
            async {
                let mut rest = Vec::new();
                stream.take(max.saturating_add(1)).read_to_end(&mut rest).await?;
                body.extend_from_slice(&rest);
                Ok(())
            },
            self.limits.timeout,
            cancel,
        )
        .await?;

        if body.len() as u64 > max {
            return Err(ProtocolError::Oversize {
                size: body.len() as u64,
                max,
            }
            .into());
        }

        if body.starts_with(MAGIC) {
            return Ok(decode_frame(&body)?.payload);
        }

        Ok(body.freeze())
    }
}
