use serde::{Deserialize, Serialize};

/// Connection and window settings for [`super::PlotterDriver`].
///
/// ```rust,ignore
/// let config = PlotterDriverConfig::new("192.168.0.126".to_string(), 80);
/// if let Err(e) = config.validate() {
///     println!("Configuration error: {}", e);
///     return;
/// }
/// let driver = PlotterDriver::connect(config).await?;
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PlotterDriverConfig {
    pub addr: String,
    pub port: u16,
    /// WebSocket path on the controller.
    pub path: String,
    /// Maximum in-flight lines.
    pub window_size: usize,
    /// How long to wait for an ack before retransmitting, ms.
    pub ack_timeout_ms: u64,
    /// Homing blocks the controller loop, so its ack gets a long leash, ms.
    pub home_timeout_ms: u64,
    /// Retransmissions per line before the stream is failed.
    pub max_retries: u32,
    /// Pause after a `busy` reply, ms.
    pub busy_backoff_ms: u64,
    /// How long a cancelled stream keeps draining acks, ms.
    pub drain_timeout_ms: u64,
}

impl PlotterDriverConfig {
    pub fn new(addr: String, port: u16) -> Self {
        Self {
            addr,
            port,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.addr.is_empty() {
            return Err("Address cannot be empty.".to_string());
        }
        if self.port == 0 {
            return Err("Port number must be greater than 0.".to_string());
        }
        if self.window_size == 0 {
            return Err("Window size must be greater than 0.".to_string());
        }
        if self.ack_timeout_ms == 0 {
            return Err("Ack timeout must be greater than 0.".to_string());
        }
        Ok(())
    }

    /// The WebSocket URL for this controller.
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.addr, self.port, self.path)
    }
}

impl Default for PlotterDriverConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 9800,
            path: "/ws".to_string(),
            window_size: 32,
            ack_timeout_ms: 250,
            home_timeout_ms: 15_000,
            max_retries: 3,
            busy_backoff_ms: 50,
            drain_timeout_ms: 1000,
        }
    }
}
