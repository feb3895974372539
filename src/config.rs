use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Paths
    pub data_dir: PathBuf,

    // Audio
    pub opus_bitrate: u32,
    pub frame_ring_slots: usize,
    pub sink_queue_size: usize,

    // Supervisor del worker
    pub restart_backoff_ms: u64,
    pub max_restart_backoff_ms: u64,
    pub max_consecutive_faults: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "./data".to_string())
                .into(),

            opus_bitrate: std::env::var("OPUS_BITRATE")
                .unwrap_or_else(|_| "96000".to_string()) // 96kbps (Discord default)
                .parse()?,
            frame_ring_slots: std::env::var("FRAME_RING_SLOTS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()?,
            sink_queue_size: std::env::var("SINK_QUEUE_SIZE")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,

            restart_backoff_ms: std::env::var("RESTART_BACKOFF_MS")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            max_restart_backoff_ms: std::env::var("MAX_RESTART_BACKOFF_MS")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()?,
            max_consecutive_faults: std::env::var("MAX_CONSECUTIVE_FAULTS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()?,
        };

        std::fs::create_dir_all(&config.data_dir)?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Opus bitrate must be between 8kbps and 510kbps
    /// - The frame ring needs at least two slots so a packet can be in flight
    ///   while the next one is read
    /// - Queue sizes and the fault budget must be greater than 0
    /// - The backoff cap cannot be lower than the first backoff
    pub fn validate(&self) -> Result<()> {
        if self.opus_bitrate > 510000 {
            anyhow::bail!("Opus bitrate cannot exceed 510kbps, got: {}", self.opus_bitrate);
        }

        if self.opus_bitrate < 8000 {
            anyhow::bail!("Opus bitrate too low, minimum 8kbps, got: {}", self.opus_bitrate);
        }

        if self.frame_ring_slots < 2 {
            anyhow::bail!("Frame ring needs at least 2 slots, got: {}", self.frame_ring_slots);
        }

        if self.sink_queue_size == 0 {
            anyhow::bail!("Sink queue size must be greater than 0");
        }

        if self.max_consecutive_faults == 0 {
            anyhow::bail!("Max consecutive faults must be greater than 0");
        }

        if self.max_restart_backoff_ms < self.restart_backoff_ms {
            anyhow::bail!(
                "Max restart backoff ({}ms) is lower than the initial backoff ({}ms)",
                self.max_restart_backoff_ms,
                self.restart_backoff_ms
            );
        }

        Ok(())
    }

    pub fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    pub fn max_restart_backoff(&self) -> Duration {
        Duration::from_millis(self.max_restart_backoff_ms)
    }

    /// Returns a summary of the current configuration for logging.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Data: {}\n  \
            Audio: {}kbps, {} ring slots, sink queue {}\n  \
            Supervisor: backoff {} -> {}, teardown after {} faults",
            self.data_dir.display(),
            self.opus_bitrate / 1000,
            self.frame_ring_slots,
            self.sink_queue_size,
            humantime::format_duration(self.restart_backoff()),
            humantime::format_duration(self.max_restart_backoff()),
            self.max_consecutive_faults
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),

            opus_bitrate: 96000,
            frame_ring_slots: 8,
            sink_queue_size: 4,

            restart_backoff_ms: 50,
            max_restart_backoff_ms: 5000,
            max_consecutive_faults: 8,
        }
    }
}
