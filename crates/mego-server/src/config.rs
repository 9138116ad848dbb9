//! Engine configuration.
//!
//! Every option has a default, so a config file only needs the keys it changes:
//!
//! ```toml
//! bind_addr = "127.0.0.1:5000"
//! codec = "msgpack"
//! max_chunk_size = 131072
//! check_interval = 10
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use mego_protocol::Codec;
use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::method::MethodOptions;

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Address the WebSocket server listens on.
    pub bind_addr: SocketAddr,

    /// Wire codec.
    pub codec: Codec,

    /// Ceiling on the encoded size of a single request, in bytes.
    pub max_size: usize,

    /// Ceiling on a single upload chunk, in bytes.
    pub max_chunk_size: usize,

    /// Ceiling on the total size of an upload, in bytes.
    pub max_file_size: usize,

    /// Maximum concurrently registered sessions (0 = unlimited).
    pub max_sessions: usize,

    /// Interval of the liveness sweep (0 = disabled).
    #[serde(with = "duration_secs")]
    pub check_interval: Duration,

    /// Capacity of each connection's outbound queue.
    pub send_queue: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            codec: Codec::Json,
            max_size: 1024 * 1024,
            max_chunk_size: 64 * 1024,
            max_file_size: 16 * 1024 * 1024,
            max_sessions: 1024,
            check_interval: Duration::from_secs(30),
            send_queue: 256,
        }
    }
}

/// Size limits after applying per-method overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Request size ceiling.
    pub max_size: usize,
    /// Chunk size ceiling.
    pub max_chunk_size: usize,
    /// File size ceiling.
    pub max_file_size: usize,
}

impl EngineConfig {
    /// Creates a configuration listening on the given address.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(source: &str) -> ServerResult<Self> {
        let config: Self = toml::from_str(source).map_err(|e| ServerError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML config file.
    pub fn load_from(path: impl AsRef<Path>) -> ServerResult<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Serializes the configuration as TOML.
    pub fn to_toml_string(&self) -> ServerResult<String> {
        toml::to_string(self).map_err(|e| ServerError::config(e.to_string()))
    }

    /// Checks that the limits are usable together.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_size == 0 {
            return Err(ServerError::config("max_size must be greater than zero"));
        }
        if self.max_chunk_size == 0 {
            return Err(ServerError::config("max_chunk_size must be greater than zero"));
        }
        if self.max_chunk_size > self.max_file_size {
            return Err(ServerError::config(format!(
                "max_chunk_size ({}) exceeds max_file_size ({})",
                self.max_chunk_size, self.max_file_size
            )));
        }
        if self.send_queue == 0 {
            return Err(ServerError::config("send_queue must be greater than zero"));
        }
        Ok(())
    }

    /// Resolves the limits for a method, preferring its own overrides.
    pub fn limits_for(&self, options: &MethodOptions) -> Limits {
        Limits {
            max_size: options.max_size.unwrap_or(self.max_size),
            max_chunk_size: options.max_chunk_size.unwrap_or(self.max_chunk_size),
            max_file_size: options.max_file_size.unwrap_or(self.max_file_size),
        }
    }

    /// Returns the sweep interval, or `None` when disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (!self.check_interval.is_zero()).then_some(self.check_interval)
    }

    /// Builder: set the wire codec.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Builder: set the request size ceiling.
    pub fn with_max_size(mut self, max: usize) -> Self {
        self.max_size = max;
        self
    }

    /// Builder: set the chunk size ceiling.
    pub fn with_max_chunk_size(mut self, max: usize) -> Self {
        self.max_chunk_size = max;
        self
    }

    /// Builder: set the file size ceiling.
    pub fn with_max_file_size(mut self, max: usize) -> Self {
        self.max_file_size = max;
        self
    }

    /// Builder: set max sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Builder: set the liveness sweep interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Builder: set the per-connection send queue capacity.
    pub fn with_send_queue(mut self, capacity: usize) -> Self {
        self.send_queue = capacity;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
