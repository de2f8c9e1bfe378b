//! Client-side wire protocol for a monitoring server and its agents.
//!
//! - [`Sender`] pushes item values to a server or proxy (port 10051),
//!   splitting large batches into chunks.
//! - [`Getter`] asks an agent for a single key (port 10050).
//! - [`Version`] compares server/agent versions across strings and numbers.
//! - [`api`] is the seam to the server's JSON-RPC API.
//!
//! Both clients speak the `ZBXD` frame format implemented in [`frame`].

pub mod aggregate;
pub mod api;
pub mod chunk;
pub mod config;
pub mod error;
pub mod frame;
pub mod getter;
pub mod item;
pub mod payload;
pub mod sender;
pub mod transport;
pub mod version;

pub use aggregate::{ChunkReport, SendResult, Summary, Totals, aggregate};
pub use api::{ApiCall, ApiError, ApiRequest, ApiResponse, fetch_version};
pub use chunk::{Chunk, Chunks, DEFAULT_CHUNK_SIZE, chunk};
pub use config::{GetConfig, Node, SenderConfig};
pub use error::{Error, ProtocolError, Result, TransportError};
pub use frame::{Frame, FrameCodec, HeaderVariant, decode_frame, encode_frame};
pub use getter::{GetState, Getter};
pub use item::{ItemValue, Value};
pub use payload::{AgentResponse, ChunkResponse, from_payload, to_payload};
pub use sender::Sender;
pub use transport::{Connector, TcpConnector};
pub use tokio_util::sync::CancellationToken;
pub use version::{IntoVersion, Version, check_supported, compare};
