use std::time::Duration;

use serde::Deserialize;
use partwire_core::error::{PartwireError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartwireConfig {
    pub version: u32,

    #[serde(default)]
    pub negotiation: NegotiatorConfig,

    #[serde(default)]
    pub codec: CodecConfig,
}

impl PartwireConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(PartwireError::BadConfig(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.negotiation.validate()?;
        self.codec.validate()?;
        Ok(())
    }
}

impl Default for PartwireConfig {
    fn default() -> Self {
        Self {
            version: 1,
            negotiation: NegotiatorConfig::default(),
            codec: CodecConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NegotiatorConfig {
    /// Upper bound on one schema request round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Push unseen schemas ahead of outbound messages. When off, the peer
    /// has to request them.
    #[serde(default = "default_push_schemas")]
    pub push_schemas: bool,

    #[serde(default = "default_max_request_batch")]
    pub max_request_batch: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            push_schemas: default_push_schemas(),
            max_request_batch: default_max_request_batch(),
        }
    }
}

impl NegotiatorConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1..=600_000).contains(&self.request_timeout_ms) {
            return Err(PartwireError::BadConfig(
                "negotiation.request_timeout_ms must be between 1 and 600000".into(),
            ));
        }
        if !(1..=4096).contains(&self.max_request_batch) {
            return Err(PartwireError::BadConfig(
                "negotiation.max_request_batch must be between 1 and 4096".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_push_schemas() -> bool {
    true
}
fn default_max_request_batch() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodecConfig {
    /// Inbound messages larger than this are rejected before any parsing.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1024..=1_073_741_824).contains(&self.max_frame_bytes) {
            return Err(PartwireError::BadConfig(
                "codec.max_frame_bytes must be between 1024 and 1073741824".into(),
            ));
        }
        Ok(())
    }
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}
