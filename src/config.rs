use std::path::Path;

use serde::Deserialize;

use crate::Result;

/// Session behavior, loadable from TOML.
///
/// ```toml
/// strict_variables = true
/// max_output_len = 4194304
/// max_iterations = 100000
///
/// [diagnostics]
/// include_frames = true
/// max_frames = 8
/// class = "component-error"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Reading an undefined template variable is an error rather than `nil`.
    pub strict_variables: bool,
    /// Upper bound in bytes on the markup of one template part and on any string it builds.
    pub max_output_len: usize,
    /// Upper bound on `for` iterations within one render of a component.
    pub max_iterations: usize,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiagnosticsConfig {
    /// Lists the cause chain below the error message.
    pub include_frames: bool,
    pub max_frames: usize,
    /// `class` attribute of the diagnostic element.
    pub class: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strict_variables: true,
            max_output_len: 4 << 20,
            max_iterations: 100_000,
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}
impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            include_frames: true,
            max_frames: 16,
            class: "sigview-error".to_string(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }
}
