use serde::Deserialize;
use std::path::Path;

/// Limits applied when building orthogonal bitmap functions and decoding their states.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct OrthConfig {
    /// Maximum number of declared buckets per aggregate call, also the largest
    /// bucket count accepted from a serialized state.
    pub max_buckets: usize,
    /// Maximum expression length in bytes
    pub max_expression_len: usize,
    /// Maximum parenthesis nesting in an expression
    pub max_expression_depth: usize,
    pub log_level: String,
}

impl Default for OrthConfig {
    fn default() -> Self {
        Self {
            max_buckets: 4096,
            max_expression_len: 64 * 1024,
            max_expression_depth: 256,
            log_level: "info".to_string(),
        }
    }
}

impl OrthConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&contents)?)
    }

    pub fn from_toml_str(contents: &str) -> crate::Result<Self> {
        let config: OrthConfig =
            toml::from_str(contents).map_err(|e| crate::OrthError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.max_buckets == 0 {
            return Err(crate::OrthError::Config("max_buckets must be positive".to_string()));
        }
        if self.max_expression_depth == 0 {
            return Err(crate::OrthError::Config(
                "max_expression_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
