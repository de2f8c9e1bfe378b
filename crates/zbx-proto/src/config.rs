//! Client configuration.
//!
//! Configs are plain values, read-only once built, and can be shared between
//! concurrent calls. They deserialize from camelCase JSON with every field
//! optional, or (for the sender) from an agent configuration file.

use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Result;
use crate::chunk::DEFAULT_CHUNK_SIZE;
use crate::error::Error;
use crate::frame::{DEFAULT_MAX_FRAME_SIZE, HeaderVariant};
use crate::version::Version;

pub const DEFAULT_SENDER_PORT: u16 = 10051;
pub const DEFAULT_AGENT_PORT: u16 = 10050;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// A `host:port` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub host: String,
    pub port: u16,
}

impl Node {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]:port` or a bare IPv6 address.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty host or an invalid port.
    pub fn parse(text: &str, default_port: u16) -> Result<Self> {
        let text = text.trim();
        let bad = |why: &str| Error::config(format!("invalid address {text:?}: {why}"));

        let (host, port) = if let Some(rest) = text.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| bad("unclosed '['"))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(bad("unexpected text after ']'")),
            }
        } else if text.matches(':').count() > 1 {
            (text, None)
        } else {
            match text.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (text, None),
            }
        };

        if host.is_empty() {
            return Err(bad("empty host"));
        }

        let port = match port {
            Some(p) => p.parse::<u16>().map_err(|_| bad("invalid port"))?,
            None => default_port,
        };

        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error as _;

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Parts { host: String, port: Option<u16> },
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Node::parse(&text, DEFAULT_SENDER_PORT).map_err(D::Error::custom),
            Raw::Parts { host, port } => Ok(Node::new(host, port.unwrap_or(DEFAULT_SENDER_PORT))),
        }
    }
}

fn default_sender_clusters() -> Vec<Vec<Node>> {
    vec![vec![Node::new("127.0.0.1", DEFAULT_SENDER_PORT)]]
}

fn default_agent_node() -> Node {
    Node::new("127.0.0.1", DEFAULT_AGENT_PORT)
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_frame_size() -> u64 {
    DEFAULT_MAX_FRAME_SIZE
}

/// Sender (trapper) client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderConfig {
    /// Each cluster gets every chunk; nodes within a cluster are tried in
    /// order until one accepts the connection.
    #[serde(default = "default_sender_clusters")]
    pub clusters: Vec<Vec<Node>>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub source_ip: Option<IpAddr>,

    #[serde(default)]
    pub peer_version: Option<Version>,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u64,

    /// Stamp each request with the time it was sent.
    #[serde(default)]
    pub request_clock: bool,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            clusters: default_sender_clusters(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            source_ip: None,
            peer_version: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            request_clock: false,
        }
    }
}

impl SenderConfig {
    /// Single server, everything else default.
    #[must_use]
    pub fn for_server(node: Node) -> Self {
        Self {
            clusters: vec![vec![node]],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn with_peer_version(mut self, version: Version) -> Self {
        self.peer_version = Some(version);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn header_variant(&self) -> HeaderVariant {
        self.peer_version
            .as_ref()
            .map_or(HeaderVariant::Standard, HeaderVariant::for_version)
    }

    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::config("chunk size must be a positive integer"));
        }
        if self.timeout_secs == 0 {
            return Err(Error::config("timeout must be at least one second"));
        }
        if self.clusters.is_empty() || self.clusters.iter().any(Vec::is_empty) {
            return Err(Error::config("every cluster needs at least one node"));
        }
        Ok(())
    }

    /// Load a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("invalid config {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Build a config from an agent configuration file.
    ///
    /// Reads `ServerActive` (clusters separated by `,`, nodes by `;`), falling
    /// back to `Server`, and `SourceIP`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the file cannot be read or holds bad addresses.
    pub fn from_agent_config(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_agent_config_str(&content)
    }

    /// # Errors
    ///
    /// Returns `Error::Config` for bad addresses.
    pub fn from_agent_config_str(content: &str) -> Result<Self> {
        let mut server_active = None;
        let mut server = None;
        let mut source_ip = None;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "ServerActive" => server_active = Some(value.to_string()),
                "Server" => server = Some(value.to_string()),
                "SourceIP" if !value.is_empty() => source_ip = Some(value.to_string()),
                _ => {}
            }
        }

        let mut config = Self::default();

        if let Some(list) = server_active.or(server).filter(|s| !s.is_empty()) {
            config.clusters = list
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|cluster| {
                    cluster
                        .split(';')
                        .map(str::trim)
                        .filter(|n| !n.is_empty())
                        .map(|n| Node::parse(n, DEFAULT_SENDER_PORT))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;
        }

        if let Some(ip) = source_ip {
            config.source_ip = Some(
                ip.parse()
                    .map_err(|_| Error::config(format!("invalid SourceIP: {ip}")))?,
            );
        }

        tracing::debug!(
            "Loaded {} cluster(s) from agent config",
            config.clusters.len()
        );

        config.validate()?;
        Ok(config)
    }
}

/// Get (passive agent check) client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConfig {
    #[serde(default = "default_agent_node")]
    pub node: Node,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub source_ip: Option<IpAddr>,

    #[serde(default)]
    pub peer_version: Option<Version>,

    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: u64,
}

impl Default for GetConfig {
    fn default() -> Self {
        Self {
            node: default_agent_node(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            source_ip: None,
            peer_version: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl GetConfig {
    #[must_use]
    pub fn for_agent(node: Node) -> Self {
        Self {
            node,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn with_peer_version(mut self, version: Version) -> Self {
        self.peer_version = Some(version);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn header_variant(&self) -> HeaderVariant {
        self.peer_version
            .as_ref()
            .map_or(HeaderVariant::Standard, HeaderVariant::for_version)
    }

    /// # Errors
    ///
    /// Returns `Error::Config` if the timeout is zero.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::config("timeout must be at least one second"));
        }
        Ok(())
    }
}
