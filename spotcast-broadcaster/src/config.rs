use std::time::Duration;

/// Default WebSocket path
pub const DEFAULT_PATH: &str = "/api/v1/ws";

/// Two missed 30s client heartbeats
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames buffered per connection before new ones are dropped
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Transport endpoint settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP path accepted for the WebSocket upgrade
    pub path: String,
    /// Close connections that send nothing for this long
    pub idle_timeout: Duration,
    /// Per-connection outbound queue capacity
    pub outbound_buffer: usize,
}

impl ServerConfig {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_outbound_buffer(mut self, outbound_buffer: usize) -> Self {
        self.outbound_buffer = outbound_buffer.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_PATH.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}
