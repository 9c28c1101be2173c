//! Negotiation / codec config loader (strict parsing).

pub mod schema;

use std::fs;

use partwire_core::error::{PartwireError, Result};

pub use schema::{CodecConfig, NegotiatorConfig, PartwireConfig};

pub fn load_from_file(path: &str) -> Result<PartwireConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| PartwireError::BadConfig(format!("read config {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<PartwireConfig> {
    let cfg: PartwireConfig = serde_yaml::from_str(s)
        .map_err(|e| PartwireError::BadConfig(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
