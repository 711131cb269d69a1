//! Compiler settings, loaded from `caliburn.toml`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// How aggressively the optimizer rewrites the instruction stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizeLevel {
    /// O0: no passes.
    #[default]
    Debug,
    /// O1.
    Basic,
    /// O2.
    Balanced,
    /// O3.
    Performance,
}

impl OptimizeLevel {
    /// Maps `0..=3` onto a level.
    pub fn from_number(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::Debug),
            1 => Some(Self::Basic),
            2 => Some(Self::Balanced),
            3 => Some(Self::Performance),
            _ => None,
        }
    }
}

/// How thoroughly the instruction stream is checked before output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    None,
    #[default]
    Basic,
    Full,
}

impl std::str::FromStr for ValidationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "basic" => Ok(Self::Basic),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown validation level `{other}`")),
        }
    }
}

/// Errors raised while loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Options threaded through every pipeline stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    pub opt_level: OptimizeLevel,
    pub validation: ValidationLevel,
    /// Values for dynamically-typed declarations, keyed by name.
    pub dynamic_types: BTreeMap<String, String>,
    /// Target SPIR-V version as `[major, minor]`.
    pub spirv_version: (u8, u8),
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            opt_level: OptimizeLevel::default(),
            validation: ValidationLevel::default(),
            dynamic_types: BTreeMap::new(),
            spirv_version: (1, 5),
        }
    }
}

impl CompilerSettings {
    pub fn from_toml_str(s: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }
}
