//! Mock peers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use zbx_proto::config::Node;
use zbx_proto::frame::{FrameCodec, HeaderVariant, encode_frame};

/// What the mock peer does after reading a request.
pub enum Reply {
    /// Answer with a framed payload.
    Frame(Vec<u8>),
    /// Answer with these exact bytes.
    Raw(Vec<u8>),
    /// Keep the connection open without answering.
    Hang,
}

/// Serve `connections` framed round-trips, answering each via `handler`.
///
/// The handle resolves to the request payloads in arrival order.
pub async fn mock_peer<F>(connections: usize, handler: F) -> (Node, JoinHandle<Vec<Bytes>>)
where
    F: Fn(usize, &[u8]) -> Reply + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node = node_for(listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut requests = Vec::new();

        for i in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(stream, FrameCodec::new(HeaderVariant::Large));

            let frame = framed.next().await.unwrap().unwrap();
            requests.push(frame.payload.clone());

            let bytes = match handler(i, &frame.payload) {
                Reply::Frame(payload) => encode_frame(&payload, HeaderVariant::Standard)
                    .unwrap()
                    .to_vec(),
                Reply::Raw(bytes) => bytes,
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    continue;
                }
            };

            let stream = framed.get_mut();
            stream.write_all(&bytes).await.unwrap();
            stream.shutdown().await.unwrap();
        }

        requests
    });

    (node, handle)
}

/// An address nothing listens on.
pub async fn closed_node() -> Node {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let node = node_for(listener.local_addr().unwrap());
    drop(listener);
    node
}

pub fn node_for(addr: SocketAddr) -> Node {
    Node::new(addr.ip().to_string(), addr.port())
}

/// A successful sender reply accounting for `processed` records.
pub fn success_reply(processed: usize) -> Vec<u8> {
    format!(
        r#"{{"response":"success","info":"processed: {processed}; failed: 0; total: {processed}; seconds spent: 0.000100"}}"#
    )
    .into_bytes()
}

/// Number of records in a sender request.
pub fn record_count(request: &[u8]) -> usize {
    let json: serde_json::Value = serde_json::from_slice(request).unwrap();
    json["data"].as_array().unwrap().len()
}
