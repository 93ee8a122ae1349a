//! Engine settings.

use std::time::Duration;

use serde::Deserialize;
use tabula_engine::engine::Shape;

use crate::error::{Result, TabulaError};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Wall-clock limit for one cell evaluation or macro run, in seconds
    pub timeout_secs: f64,
    pub default_row_height: f64,
    pub default_col_width: f64,
    /// Initial `[rows, cols, sheets]`
    pub shape: [usize; 3],
    /// Undo steps kept by `History`
    pub max_undo: usize,
    /// Rendered results longer than this are truncated
    pub max_result_length: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timeout_secs: 10.0,
            default_row_height: 26.0,
            default_col_width: 75.0,
            shape: [1000, 100, 3],
            max_undo: 100,
            max_result_length: 1000,
        }
    }
}

impl EngineConfig {
    pub fn shape(&self) -> Shape {
        let [rows, cols, sheets] = self.shape;
        Shape::new(rows, cols, sheets)
    }

    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(TabulaError::Config(format!(
                "timeout_secs must be a positive number, got {}",
                self.timeout_secs
            )));
        }
        for (name, size) in [
            ("default_row_height", self.default_row_height),
            ("default_col_width", self.default_col_width),
        ] {
            if !(size.is_finite() && size > 0.0) {
                return Err(TabulaError::Config(format!(
                    "{} must be a positive number, got {}",
                    name, size
                )));
            }
        }
        if self.shape.contains(&0) {
            return Err(TabulaError::Config(format!(
                "shape must be at least 1 along every axis, got {:?}",
                self.shape
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.shape(), Shape::new(1000, 100, 3));
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = EngineConfig {
            timeout_secs: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(TabulaError::Config(_))));

        let config = EngineConfig {
            shape: [10, 0, 1],
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"timeout_secs": 2.5, "shape": [10, 10, 1]}"#).unwrap();
        assert_eq!(config.timeout_secs, 2.5);
        assert_eq!(config.max_undo, 100);
        assert_eq!(config.shape(), Shape::new(10, 10, 1));

        let unknown = serde_json::from_str::<EngineConfig>(r#"{"timeout": 1}"#);
        assert!(unknown.is_err());
    }
}
