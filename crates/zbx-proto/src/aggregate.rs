//! Folding per-chunk acknowledgements into one result.
//!
//! Chunks are kept separate by default so a caller can see which part of a
//! batch failed; [`SendResult::total`] sums them when one figure is enough.

use std::fmt;

use serde::Serialize;

use crate::payload::ChunkResponse;

/// Outcome of one chunk round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    #[serde(flatten)]
    pub response: ChunkResponse,
    /// Why the round-trip failed. `None` when the server acknowledged it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node that answered, or the cluster that could not be reached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
}

impl ChunkReport {
    #[must_use]
    pub fn delivered(response: ChunkResponse) -> Self {
        Self {
            response,
            error: None,
            node: None,
        }
    }

    /// Every record of the chunk is marked failed.
    #[must_use]
    pub fn failed(chunk: usize, records: usize, error: impl fmt::Display) -> Self {
        Self {
            response: ChunkResponse::all_failed(chunk, records),
            error: Some(error.to_string()),
            node: None,
        }
    }

    #[must_use]
    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}

/// Caller-facing view of a send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    Single(ChunkResponse),
    Chunks(Vec<ChunkResponse>),
}

/// Sum of all chunk responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    pub processed: u64,
    pub failed: u64,
    pub total: u64,
    pub time: String,
    pub chunks: usize,
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}; failed: {}; total: {}; seconds spent: {}",
            self.processed, self.failed, self.total, self.time
        )
    }
}

/// Result of a sender call, one report per chunk in send order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SendResult {
    chunks: Vec<ChunkReport>,
}

/// Build the result of a send from its chunk reports.
#[must_use]
pub fn aggregate(reports: Vec<ChunkReport>) -> SendResult {
    SendResult { chunks: reports }
}

impl SendResult {
    #[must_use]
    pub fn chunks(&self) -> &[ChunkReport] {
        &self.chunks
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The single response for one chunk, otherwise every response in order.
    #[must_use]
    pub fn summary(&self) -> Summary {
        let mut responses: Vec<ChunkResponse> =
            self.chunks.iter().map(|c| c.response.clone()).collect();

        if responses.len() == 1 {
            Summary::Single(responses.remove(0))
        } else {
            Summary::Chunks(responses)
        }
    }

    #[must_use]
    pub fn total(&self) -> Totals {
        let seconds: f64 = self
            .chunks
            .iter()
            .map(|c| c.response.time.parse::<f64>().unwrap_or(0.0))
            .fold(0.0, |acc, t| acc + t);

        Totals {
            processed: self.chunks.iter().map(|c| c.response.processed).sum(),
            failed: self.chunks.iter().map(|c| c.response.failed).sum(),
            total: self.chunks.iter().map(|c| c.response.total).sum(),
            time: format!("{seconds:.6}"),
            chunks: self.chunks.len(),
        }
    }

    pub fn failed_chunks(&self) -> impl Iterator<Item = &ChunkReport> {
        self.chunks.iter().filter(|c| !c.is_delivered())
    }

    /// True when every chunk was delivered and no record was rejected.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.chunks
            .iter()
            .all(|c| c.is_delivered() && c.response.failed == 0)
    }
}

impl IntoIterator for SendResult {
    type Item = ChunkReport;
    type IntoIter = std::vec::IntoIter<ChunkReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.into_iter()
    }
}
