//! Configuration file helpers for Catboard
//!
//! Locates and parses JSON configuration files, either from an explicit
//! path or from the shared Catboard config directory (~/.config/catboard/).

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Get the Catboard config directory (~/.config/catboard/)
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("catboard"))
}

/// Get the path to a config file within the Catboard config directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|p| p.join(filename))
}

/// Return the first candidate path that exists on disk
pub fn first_existing<I, P>(candidates: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    candidates.into_iter().map(Into::into).find(|p| p.exists())
}

/// Load and parse a JSON file from an arbitrary path
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir() {
        let dir = config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with("catboard"));
    }

    #[test]
    fn test_config_path() {
        let path = config_path("config.json");
        assert!(path.is_some());
        assert!(path.unwrap().ends_with("catboard/config.json"));
    }

    #[test]
    fn test_first_existing() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.json");
        std::fs::write(&present, "{}").unwrap();

        let found = first_existing([dir.path().join("missing.json"), present.clone()]);
        assert_eq!(found, Some(present));

        let none = first_existing([dir.path().join("missing.json")]);
        assert!(none.is_none());
    }

    #[test]
    fn test_load_json_file() {
        #[derive(serde::Deserialize)]
        struct Sample {
            name: String,
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.json");
        std::fs::write(&path, r#"{ "name": "catboard" }"#).unwrap();

        let sample: Sample = load_json_file(&path).unwrap();
        assert_eq!(sample.name, "catboard");

        std::fs::write(&path, "not json").unwrap();
        assert!(load_json_file::<Sample>(&path).is_err());
    }
}
