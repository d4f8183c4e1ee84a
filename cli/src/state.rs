use bitbucket::ResourceData;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Cannot access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid state file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Operation interrupted")]
    Interrupted,
}

pub fn load(path: &Path) -> Result<ResourceData, StateError> {
    let contents = fs::read_to_string(path).map_err(|source| StateError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_str(&contents).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes through a sibling temp file; the state file always holds either the
/// previous record or the new one.
pub fn save(path: &Path, data: &ResourceData) -> Result<(), StateError> {
    let json = serde_json::to_string_pretty(data).map_err(|source| StateError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::write(&tmp, json + "\n").map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_preserves_record() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("variable.json");

        let mut data = ResourceData::new()
            .with_attribute("key", "API_TOKEN")
            .with_attribute("deployment", "acme/api:{env}");
        data.set_id("{u1}");

        save(&path, &data).unwrap();
        assert_eq!(load(&path).unwrap(), data);
        assert!(!dir.path().join("variable.json.tmp").exists());
    }

    #[test]
    fn test_load_hand_written_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.json");
        fs::write(
            &path,
            r#"{"attributes": {"key": "K", "value": "V", "deployment": "r:d"}}"#,
        )
        .unwrap();

        let data = load(&path).unwrap();
        assert_eq!(data.id(), "");
        assert_eq!(data.get_str("deployment").unwrap(), "r:d");
    }

    #[test]
    fn test_load_errors() {
        let dir = TempDir::new().unwrap();

        let missing = dir.path().join("missing.json");
        assert!(matches!(load(&missing), Err(StateError::Io { .. })));

        let garbage = dir.path().join("garbage.json");
        fs::write(&garbage, "not json").unwrap();
        assert!(matches!(load(&garbage), Err(StateError::Json { .. })));
    }
}
