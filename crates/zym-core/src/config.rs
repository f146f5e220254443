//! Runtime and compiler configuration (`zym.toml`)

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },

    #[error("unknown tail-call mode '{0}', expected one of: off, safe, smart, aggressive")]
    UnknownTcoMode(String),
}

/// Tail-call optimization policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcoMode {
    /// Never emit tail calls
    Off,
    /// Only self-recursion in functions that capture nothing
    #[default]
    Safe,
    /// `Safe`, plus runtime-checked tail calls everywhere else
    Smart,
    /// Every call in tail position
    Aggressive,
}

impl TcoMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TcoMode::Off => "off",
            TcoMode::Safe => "safe",
            TcoMode::Smart => "smart",
            TcoMode::Aggressive => "aggressive",
        }
    }
}

impl FromStr for TcoMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(TcoMode::Off),
            "safe" => Ok(TcoMode::Safe),
            "smart" => Ok(TcoMode::Smart),
            "aggressive" => Ok(TcoMode::Aggressive),
            _ => Err(ConfigError::UnknownTcoMode(s.to_string())),
        }
    }
}

impl fmt::Display for TcoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiler options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct CompilerConfig {
    /// Record source lines for runtime error traces
    pub include_line_info: bool,

    /// Initial tail-call mode; `@tco` directives override it lexically
    pub tco: TcoMode,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            include_line_info: true,
            tco: TcoMode::Safe,
        }
    }
}

/// Collector tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct GcConfig {
    /// Bytes allocated before the first collection
    pub initial_threshold: usize,

    /// After a collection the next threshold is live bytes times this
    pub grow_factor: usize,

    /// Collect before every allocation
    pub stress: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            initial_threshold: 1024 * 1024,
            grow_factor: 2,
            stress: false,
        }
    }
}

/// Interpreter options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct VmConfig {
    /// Call depth at which execution fails with a stack overflow
    pub max_frames: usize,

    /// Instructions per slice when running preemptively
    pub timeslice: Option<u64>,

    pub gc: GcConfig,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 4096,
            timeslice: None,
            gc: GcConfig::default(),
        }
    }
}

/// The complete zym.toml file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    pub compiler: CompilerConfig,
    pub vm: VmConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.vm.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "vm.max-frames",
                reason: "must be at least 1",
            });
        }
        if self.vm.gc.grow_factor == 0 {
            return Err(ConfigError::Invalid {
                field: "vm.gc.grow-factor",
                reason: "must be at least 1",
            });
        }
        if self.vm.timeslice == Some(0) {
            return Err(ConfigError::Invalid {
                field: "vm.timeslice",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.vm.max_frames, 4096);
        assert_eq!(config.vm.gc.grow_factor, 2);
        assert!(config.compiler.include_line_info);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[compiler]
include-line-info = false
tco = "aggressive"

[vm]
max-frames = 128
timeslice = 1000

[vm.gc]
initial-threshold = 4096
stress = true
"#;
        let config = Config::parse(toml).unwrap();
        assert!(!config.compiler.include_line_info);
        assert_eq!(config.compiler.tco, TcoMode::Aggressive);
        assert_eq!(config.vm.max_frames, 128);
        assert_eq!(config.vm.timeslice, Some(1000));
        assert_eq!(config.vm.gc.initial_threshold, 4096);
        assert!(config.vm.gc.stress);
        assert_eq!(config.vm.gc.grow_factor, 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = Config::parse("[vm]\nstack = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_frames_is_invalid() {
        let err = Config::parse("[vm]\nmax-frames = 0\n").unwrap_err();
        assert!(err.to_string().contains("vm.max-frames"));
    }

    #[test]
    fn tco_mode_from_str() {
        assert_eq!("smart".parse::<TcoMode>().unwrap(), TcoMode::Smart);
        assert!("sometimes".parse::<TcoMode>().is_err());
    }

    #[test]
    fn read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zym.toml");
        std::fs::write(&path, "[compiler]\ntco = \"off\"\n").unwrap();
        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.compiler.tco, TcoMode::Off);
    }
}
