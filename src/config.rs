//! Configuration loading.
//!
//! The MT-32 options live in a `[midi]` table whose keys are the classic
//! `mt32.*` names; TOML dotted keys nest them naturally:
//!
//! ```toml
//! [midi]
//! mt32.romdir = "roms"
//! mt32.reverb.mode = "2"
//! mt32.reverb.time = 5
//! mt32.reverb.level = 3
//! mt32.dac = "auto"
//! mt32.reverse.stereo = "off"
//! mt32.verbose = "off"
//!
//! [jack]
//! client_name = "mt32emu"
//! ports = 1
//! ```
//!
//! Every key is optional. String options keep their raw form here;
//! [`Mt32Options::from_section`] turns them into typed settings.

use crate::synth::{DacInputMode, ReverbOverride};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sentinel meaning "leave the engine default alone".
pub const AUTO: &str = "auto";

/// Sentinel enabling a boolean string option.
pub const ON: &str = "on";

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value {value:?} for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub midi: MidiSection,
    pub jack: JackSection,
}

impl Config {
    /// Loads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, Path::new("<string>"))
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// The `[midi]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSection {
    pub mt32: Mt32Section,
}

/// `mt32.*` keys, as raw values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mt32Section {
    /// Directory holding the control and PCM ROM images.
    pub romdir: String,
    pub reverb: ReverbSection,
    /// `"auto"` or a DAC input mode number.
    pub dac: String,
    pub reverse: ReverseSection,
    /// `"on"` enables engine debug traces.
    pub verbose: String,
}

impl Default for Mt32Section {
    fn default() -> Self {
        Self {
            romdir: String::new(),
            reverb: ReverbSection::default(),
            dac: AUTO.to_string(),
            reverse: ReverseSection::default(),
            verbose: "off".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbSection {
    /// `"auto"` or a reverb mode number.
    pub mode: String,
    pub time: i64,
    pub level: i64,
}

impl Default for ReverbSection {
    fn default() -> Self {
        Self {
            mode: AUTO.to_string(),
            time: 5,
            level: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverseSection {
    /// `"on"` swaps the left and right output channels.
    pub stereo: String,
}

impl Default for ReverseSection {
    fn default() -> Self {
        Self {
            stereo: "off".to_string(),
        }
    }
}

/// The `[jack]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JackSection {
    pub client_name: String,
    /// Number of MIDI endpoints (one transport client each).
    pub ports: usize,
    /// Per-session event queue size.
    pub queue_capacity: usize,
    /// How far in the past a timestamp may be and still be accepted.
    pub late_tolerance_ms: u64,
}

impl Default for JackSection {
    fn default() -> Self {
        Self {
            client_name: "mt32emu".to_string(),
            ports: 1,
            queue_capacity: 1024,
            late_tolerance_ms: 50,
        }
    }
}

/// Typed MT-32 settings derived from [`Mt32Section`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mt32Options {
    pub romdir: String,
    /// `None` keeps the engine's default reverb.
    pub reverb: Option<ReverbOverride>,
    /// `None` keeps the engine's default DAC emulation.
    pub dac: Option<DacInputMode>,
    pub reversed_stereo: bool,
    pub verbose: bool,
}

impl Mt32Options {
    /// Validates the raw section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a mode string is neither
    /// `"auto"` nor an accepted number, or reverb time/level does not fit a byte.
    pub fn from_section(section: &Mt32Section) -> Result<Self, ConfigError> {
        let reverb = if section.reverb.mode == AUTO {
            None
        } else {
            let mode = parse_small(&section.reverb.mode, 3, "mt32.reverb.mode")?;
            let time = byte_value(section.reverb.time, "mt32.reverb.time")?;
            let level = byte_value(section.reverb.level, "mt32.reverb.level")?;
            Some(ReverbOverride { mode, time, level })
        };

        let dac = if section.dac == AUTO {
            None
        } else {
            let value = parse_small(&section.dac, 3, "mt32.dac")?;
            Some(DacInputMode::try_from(value).map_err(|_| ConfigError::InvalidValue {
                key: "mt32.dac",
                value: section.dac.clone(),
            })?)
        };

        Ok(Self {
            romdir: section.romdir.clone(),
            reverb,
            dac,
            reversed_stereo: section.reverse.stereo == ON,
            verbose: section.verbose == ON,
        })
    }
}

fn parse_small(value: &str, max: u8, key: &'static str) -> Result<u8, ConfigError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn byte_value(value: i64, key: &'static str) -> Result<u8, ConfigError> {
    u8::try_from(value).map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
