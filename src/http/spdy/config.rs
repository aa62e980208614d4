//! Connection configuration

use super::error::{Error, Result};
use super::settings::{Settings, SettingsBuilder};
use super::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};
use std::time::Duration;

/// Smallest header work buffer the compressor can operate in
pub const MIN_HEADER_BUFFER_SIZE: usize = 64;

/// Smallest inbound frame limit; fits every fixed-size control frame
pub const MIN_INBOUND_FRAME_SIZE: usize = 1024;

/// Settings for one SPDY connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Close the connection after this long without reading a frame
    pub idle_timeout: Option<Duration>,
    /// Receive window advertised for every stream
    pub initial_window_size: u32,
    /// Streams the peer may open concurrently
    pub max_concurrent_streams: Option<u32>,
    /// Size of each pooled header compression buffer
    pub header_buffer_size: usize,
    /// Largest DATA payload per frame
    pub max_frame_payload: usize,
    /// Largest frame payload accepted from the peer
    pub max_inbound_frame_size: usize,
    /// Probe size for the negotiator's speculative read
    pub speculative_read_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            idle_timeout: Some(Duration::from_secs(60)),
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_concurrent_streams: Some(100),
            header_buffer_size: 8192,
            max_frame_payload: 8192,
            max_inbound_frame_size: 1 << 20,
            speculative_read_size: 100,
        }
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Check every value is usable
    pub fn validate(&self) -> Result<()> {
        if self.initial_window_size == 0 || self.initial_window_size > MAX_WINDOW_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Initial window size {} outside valid range (1-2^31-1)",
                self.initial_window_size
            )));
        }
        if self.header_buffer_size < MIN_HEADER_BUFFER_SIZE {
            return Err(Error::InvalidSettings(format!(
                "Header buffer size {} below minimum {}",
                self.header_buffer_size, MIN_HEADER_BUFFER_SIZE
            )));
        }
        if self.max_frame_payload == 0 || self.max_frame_payload > super::codec::MAX_FRAME_LENGTH {
            return Err(Error::InvalidSettings(format!(
                "Frame payload size {} outside valid range",
                self.max_frame_payload
            )));
        }
        if self.max_inbound_frame_size < MIN_INBOUND_FRAME_SIZE
            || self.max_inbound_frame_size > super::codec::MAX_FRAME_LENGTH
        {
            return Err(Error::InvalidSettings(format!(
                "Inbound frame size {} outside valid range",
                self.max_inbound_frame_size
            )));
        }
        if self.speculative_read_size == 0 {
            return Err(Error::InvalidSettings(
                "Speculative read size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// SETTINGS advertised when the connection starts
    pub fn local_settings(&self) -> Result<Settings> {
        let mut builder = SettingsBuilder::new().initial_window_size(self.initial_window_size);
        if let Some(max) = self.max_concurrent_streams {
            builder = builder.max_concurrent_streams(max);
        }
        builder.build()
    }
}

/// Builder for [`ConnectionConfig`]
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn new() -> Self {
        ConnectionConfigBuilder::default()
    }

    /// Idle timeout; `None` waits forever
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.config.initial_window_size = size;
        self
    }

    pub fn max_concurrent_streams(mut self, max: Option<u32>) -> Self {
        self.config.max_concurrent_streams = max;
        self
    }

    pub fn header_buffer_size(mut self, size: usize) -> Self {
        self.config.header_buffer_size = size;
        self
    }

    pub fn max_frame_payload(mut self, size: usize) -> Self {
        self.config.max_frame_payload = size;
        self
    }

    pub fn max_inbound_frame_size(mut self, size: usize) -> Self {
        self.config.max_inbound_frame_size = size;
        self
    }

    pub fn speculative_read_size(mut self, size: usize) -> Self {
        self.config.speculative_read_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.initial_window_size, 65536);
        assert_eq!(config.max_concurrent_streams, Some(100));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.max_inbound_frame_size, 1 << 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_validation() {
        assert!(ConnectionConfig::builder().header_buffer_size(16).build().is_err());
        assert!(ConnectionConfig::builder().initial_window_size(0).build().is_err());
        assert!(ConnectionConfig::builder().max_frame_payload(0).build().is_err());
        assert!(ConnectionConfig::builder().max_inbound_frame_size(16).build().is_err());
        assert!(ConnectionConfig::builder().max_inbound_frame_size(1 << 24).build().is_err());

        let config = ConnectionConfig::builder()
            .idle_timeout(None)
            .speculative_read_size(16)
            .build()
            .unwrap();
        assert_eq!(config.idle_timeout, None);
        assert_eq!(config.speculative_read_size, 16);
    }

    #[test]
    fn test_local_settings() {
        let settings = ConnectionConfig::builder()
            .max_concurrent_streams(None)
            .initial_window_size(1000)
            .build()
            .unwrap()
            .local_settings()
            .unwrap();
        assert_eq!(settings.max_concurrent_streams(), None);
        assert_eq!(settings.initial_window_size(), Some(1000));
    }
}
