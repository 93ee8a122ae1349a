//! Loading the engine config file.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tabula_core::EngineConfig;

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

pub fn default_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "tabula")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}

fn read_config(path: &Path, warnings: &mut Vec<String>) -> Option<EngineConfig> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_CONFIG_FILE_BYTES => {
            warnings.push(format!(
                "Config file {} is too large ({} bytes, max {})",
                path.display(),
                meta.len(),
                MAX_CONFIG_FILE_BYTES
            ));
            return None;
        }
        Ok(_) => {}
        Err(err) => {
            warnings.push(format!("Failed to read {}: {}", path.display(), err));
            return None;
        }
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warnings.push(format!("Failed to read {}: {}", path.display(), err));
            return None;
        }
    };
    let config = match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            warnings.push(format!("Failed to parse {}: {}", path.display(), err));
            return None;
        }
    };
    if let Err(err) = config.validate() {
        warnings.push(format!("Ignoring {}: {}", path.display(), err));
        return None;
    }
    Some(config)
}

/// Load the engine config, falling back to defaults with warnings.
///
/// An explicit `config_file` must exist. Without one, `config.toml` in the
/// user config directory is used when present.
pub fn load_config(config_file: Option<&Path>) -> (EngineConfig, Vec<String>) {
    let mut warnings: Vec<String> = Vec::new();

    let config = match config_file {
        Some(path) if path.exists() => read_config(path, &mut warnings),
        Some(path) => {
            warnings.push(format!("Config file not found: {}", path.display()));
            None
        }
        None => default_config_path()
            .filter(|path| path.exists())
            .and_then(|path| read_config(&path, &mut warnings)),
    };

    (config.unwrap_or_default(), warnings)
}
