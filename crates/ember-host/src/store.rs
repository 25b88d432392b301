//! Shared-state persistence.
//!
//! The control, settings and pellet documents are JSON files shared with
//! collaborator processes. Writes go to a temp file in the same directory and
//! are renamed into place, so a reader never observes a half-written
//! document; reads retry once to ride out a concurrent rename.
//!
//! The control document is mutated from both sides, which makes blind
//! read-modify-write a race. [`StateStore::update_control`] is the only write
//! path the control loop uses: it takes the in-process lock, re-reads the
//! file, applies the mutation and writes, so a collaborator update landing
//! between the loop's last read and its write is never clobbered.

use crate::settings::Settings;
use crate::state::{Control, HistorySample, PelletDb};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

const CONTROL_FILE: &str = "control.json";
const SETTINGS_FILE: &str = "settings.json";
const PELLETDB_FILE: &str = "pelletdb.json";
const HISTORY_FILE: &str = "history.jsonl";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state document malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-backed store for the shared state documents.
pub struct StateStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn read_control(&self) -> Result<Control, StoreError> {
        self.read_json(CONTROL_FILE)
    }

    pub fn write_control(&self, control: &Control) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        self.write_json(CONTROL_FILE, control)
    }

    /// Locks, re-reads the current document, applies `mutate` and writes the
    /// result back, returning the merged snapshot. A failed write is retried
    /// once before the error is surfaced.
    pub fn update_control(
        &self,
        mutate: impl Fn(&mut Control),
    ) -> Result<Control, StoreError> {
        let _guard = self.lock.lock();
        let mut control = self.read_json(CONTROL_FILE)?;
        mutate(&mut control);
        if let Err(first) = self.write_json(CONTROL_FILE, &control) {
            warn!("control write failed, retrying once: {first}");
            self.write_json(CONTROL_FILE, &control)?;
        }
        Ok(control)
    }

    pub fn read_settings(&self) -> Result<Settings, StoreError> {
        self.read_json(SETTINGS_FILE)
    }

    pub fn write_settings(&self, settings: &Settings) -> Result<(), StoreError> {
        let _guard = self.lock.lock();
        self.write_json(SETTINGS_FILE, settings)
    }

    pub fn read_pelletdb(&self) -> Result<PelletDb, StoreError> {
        self.read_json(PELLETDB_FILE)
    }

    pub fn update_pelletdb(
        &self,
        mutate: impl Fn(&mut PelletDb),
    ) -> Result<PelletDb, StoreError> {
        let _guard = self.lock.lock();
        let mut db = self.read_json(PELLETDB_FILE)?;
        mutate(&mut db);
        self.write_json(PELLETDB_FILE, &db)?;
        Ok(db)
    }

    /// Appends one sample to the history log. Append-only, so no rename
    /// dance is needed.
    pub fn append_history(&self, sample: &HistorySample) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(sample)?;
        line.push('\n');
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(HISTORY_FILE))?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Reads a document, returning defaults when the file does not exist yet.
    /// A parse failure is retried once (a collaborator may be mid-rename) and
    /// then surfaced.
    fn read_json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, StoreError> {
        let path = self.dir.join(name);
        match self.try_read_json(&path) {
            Ok(value) => Ok(value),
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(T::default())
            }
            Err(first) => {
                warn!("read of {name} failed, retrying once: {first}");
                self.try_read_json(&path)
            }
        }
    }

    fn try_read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, StoreError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write-to-temp plus rename, so readers in other processes never see a
    /// torn document.
    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StoreError> {
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let json = serde_json::to_vec_pretty(value)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Mode;

    fn temp_store(tag: &str) -> StateStore {
        let dir = std::env::temp_dir().join(format!(
            "ember-store-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        StateStore::new(dir).unwrap()
    }

    #[test]
    fn control_round_trip_is_identity() {
        let store = temp_store("roundtrip");
        let mut control = Control::default();
        control.mode = Mode::Smoke;
        control.setpoints.probe1 = 195.0;
        store.write_control(&control).unwrap();
        assert_eq!(store.read_control().unwrap(), control);
        // Writing back what was read changes nothing.
        store.write_control(&store.read_control().unwrap()).unwrap();
        assert_eq!(store.read_control().unwrap(), control);
    }

    #[test]
    fn missing_files_read_as_defaults() {
        let store = temp_store("defaults");
        assert_eq!(store.read_control().unwrap(), Control::default());
        assert_eq!(
            store.read_pelletdb().unwrap().current.hopper_level,
            100.0
        );
    }

    #[test]
    fn update_control_preserves_external_mutation() {
        let store = temp_store("merge");
        store.write_control(&Control::default()).unwrap();

        // A collaborator requests a mode change behind our back.
        let mut external = store.read_control().unwrap();
        external.mode = Mode::Shutdown;
        external.updated = true;
        store.write_control(&external).unwrap();

        // Our update must not clobber it.
        let merged = store.update_control(|c| c.s_plus = true).unwrap();
        assert!(merged.s_plus);
        assert!(merged.updated);
        assert_eq!(merged.mode, Mode::Shutdown);
    }

    #[test]
    fn history_appends_lines() {
        let store = temp_store("history");
        let sample = HistorySample {
            ts: 1000.0,
            grill_temp: 225.0,
            grill_setpoint: 225.0,
            probe1_temp: 150.0,
            probe1_setpoint: 195.0,
            probe2_temp: 0.0,
            probe2_setpoint: 0.0,
            grill_resistance: None,
            probe1_resistance: None,
            probe2_resistance: None,
        };
        store.append_history(&sample).unwrap();
        store.append_history(&sample).unwrap();
        let text = fs::read_to_string(store.dir().join("history.jsonl")).unwrap();
        assert_eq!(text.lines().count(), 2);
        let back: HistorySample = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        assert_eq!(back, sample);
    }
}
