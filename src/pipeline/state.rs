use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

use crate::source::CursorValue;

const STATE_FILE: &str = "state.json";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{op} `{path}`: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parsing `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted pipeline state: the incremental cursor per resource.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    #[serde(default)]
    pub cursors: BTreeMap<String, CursorValue>,
}

/// `state.json` inside the pipeline working directory.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    state: PipelineState,
}

impl StateStore {
    /// Load existing state from `dir`, or start empty.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            op: "creating",
            path: dir.clone(),
            source,
        })?;

        let path = dir.join(STATE_FILE);
        let state = if path.exists() {
            let f = fs::File::open(&path).map_err(|source| StateError::Io {
                op: "opening",
                path: path.clone(),
                source,
            })?;
            serde_json::from_reader(io::BufReader::new(f))
                .map_err(|source| StateError::Parse { path: path.clone(), source })?
        } else {
            PipelineState::default()
        };
        debug!(path = %path.display(), cursors = state.cursors.len(), "state loaded");

        Ok(Self { dir, state })
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn cursor(&self, resource: &str) -> Option<&CursorValue> {
        self.state.cursors.get(resource)
    }

    /// Record a new cursor for `resource` and persist immediately.
    pub fn set_cursor(&mut self, resource: &str, value: CursorValue) -> Result<(), StateError> {
        self.state.cursors.insert(resource.to_string(), value);
        write_state(&self.dir, &self.state)
    }
}

/// Write atomically: to tmp file, then rename over the existing file.
fn write_state(dir: &Path, state: &PipelineState) -> Result<(), StateError> {
    let path = dir.join(STATE_FILE);
    let tmp_path = dir.join(format!(".{}.tmp", STATE_FILE));
    let io_err = |op: &'static str, p: &Path| {
        let p = p.to_path_buf();
        move |source: io::Error| StateError::Io { op, path: p, source }
    };

    let mut tmp = fs::File::create(&tmp_path).map_err(io_err("creating", &tmp_path))?;
    serde_json::to_writer_pretty(&mut tmp, state)
        .map_err(|source| StateError::Parse { path: tmp_path.clone(), source })?;
    tmp.write_all(b"\n").map_err(io_err("writing", &tmp_path))?;
    tmp.sync_all().map_err(io_err("syncing", &tmp_path))?;

    fs::rename(&tmp_path, &path).map_err(io_err("renaming", &path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    #[test]
    fn empty_dir_starts_without_cursors() {
        let tmp = tempdir().unwrap();
        let store = StateStore::open(tmp.path().join("mssql_tables")).unwrap();
        assert!(store.state().cursors.is_empty());
        assert_eq!(store.cursor("Products"), None);
    }

    #[test]
    fn cursors_survive_restart() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("mssql_tables");
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        {
            let mut store = StateStore::open(&dir).unwrap();
            store
                .set_cursor("Products", CursorValue::Timestamp(ts))
                .unwrap();
            store.set_cursor("Orders", CursorValue::Integer(7)).unwrap();
        }

        let store = StateStore::open(&dir).unwrap();
        assert_eq!(store.cursor("Products"), Some(&CursorValue::Timestamp(ts)));
        assert_eq!(store.cursor("Orders"), Some(&CursorValue::Integer(7)));
        assert!(!dir.join(".state.json.tmp").exists());
    }

    #[test]
    fn corrupt_state_is_an_error() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join(STATE_FILE), b"{ not json").unwrap();
        assert!(matches!(
            StateStore::open(tmp.path()),
            Err(StateError::Parse { .. })
        ));
    }
}
