use std::path::Path;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::map::DEFAULT_CAPACITY;

/// Tunables of the analysis context, every field can be omitted from the
/// configuration file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Shortest run of characters accepted as a string.
    pub min_string: usize,
    /// Initial bucket count of the name and comment tables.
    pub map_capacity: usize,
    /// Bytes per hex dump row in the listing.
    pub hex_row: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            min_string: 4,
            map_capacity: DEFAULT_CAPACITY,
            hex_row: 16,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.min_string > 0, "min_string must be at least 1");
        ensure!(self.map_capacity > 0, "map_capacity must be at least 1");
        ensure!(self.hex_row > 0, "hex_row must be at least 1");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn partial_file() {
        let config = Config::from_json(r#"{"min_string": 6}"#).unwrap();
        assert_eq!(
            config,
            Config {
                min_string: 6,
                ..Config::default()
            }
        );
    }

    #[test]
    fn rejected() {
        assert!(Config::from_json(r#"{"hex_row": 0}"#).is_err());
        assert!(Config::from_json(r#"{"colors": true}"#).is_err());
    }
}
