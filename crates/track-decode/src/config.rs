//! Decoder tuning shared by the filter, delivery and session stages.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::frame::AudioFormat;

/// Decode engine parameters. Missing TOML keys fall back to [`DecoderConfig::default`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DecoderConfig {
    /// Mixer sample rate in Hz; every delivered block uses it.
    pub target_rate: u32,
    /// Mixer channel count; every delivered block uses it.
    pub target_channels: u16,
    /// Resampler input chunk size in frames.
    pub chunk_frames: usize,
    /// Hand-off buffer size in seconds of target-format audio.
    pub buffer_seconds: f32,
    /// Consecutive corrupt packets (or failed filter runs) tolerated before the session errors.
    pub max_consecutive_errors: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            target_rate: 48_000,
            target_channels: 2,
            chunk_frames: 1024,
            buffer_seconds: 2.0,
            max_consecutive_errors: 16,
        }
    }
}

impl DecoderConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let cfg = toml::from_str::<DecoderConfig>(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.target_rate == 0 {
            bail!("target_rate must be non-zero");
        }
        if self.target_channels == 0 {
            bail!("target_channels must be non-zero");
        }
        if self.chunk_frames == 0 {
            bail!("chunk_frames must be non-zero");
        }
        if self.max_consecutive_errors == 0 {
            bail!("max_consecutive_errors must be at least 1");
        }
        Ok(())
    }

    /// Fixed format of every block handed to the mixer.
    pub fn target_format(&self) -> AudioFormat {
        AudioFormat::new(self.target_rate, self.target_channels as usize)
    }
}
