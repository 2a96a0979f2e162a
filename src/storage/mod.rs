//! Persistence layer.
//!
//! Saves and loads the weekly record to/from a single JSON file. Writes
//! go to a sibling temp file which is then renamed over the target, so a
//! kill mid-write never leaves a truncated record behind.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::types::{BotError, PersistedState};

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "bot_state.json";

/// Single-record store. One writer is assumed.
pub trait StateStore: Send + Sync {
    /// Current record, or the default when absent or unreadable.
    fn load(&self) -> PersistedState;

    /// Overwrite the record.
    fn save(&self, state: &PersistedState) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file store
// ---------------------------------------------------------------------------

pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> std::result::Result<Option<PersistedState>, BotError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)
            .map_err(|e| BotError::StateCorruption(format!("read failed: {e}")))?;
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| BotError::StateCorruption(e.to_string()))
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonStateStore {
    fn load(&self) -> PersistedState {
        let path = self.path.display().to_string();
        match self.read() {
            Ok(Some(state)) => {
                debug!(path = %path, state = %state, "State loaded from disk");
                state
            }
            Ok(None) => {
                info!(path = %path, "No saved state found, starting fresh");
                PersistedState::default()
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Ignoring unreadable state file");
                PersistedState::default()
            }
        }
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        let json =
            serde_json::to_string_pretty(state).context("Failed to serialise bot state")?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let temp = self.temp_path();
        {
            let mut file = File::create(&temp)
                .with_context(|| format!("Failed to create {}", temp.display()))?;
            file.write_all(json.as_bytes())
                .with_context(|| format!("Failed to write {}", temp.display()))?;
            file.sync_all()
                .with_context(|| format!("Failed to sync {}", temp.display()))?;
        }
        fs::rename(&temp, &self.path).with_context(|| {
            format!(
                "Failed to rename {} to {}",
                temp.display(),
                self.path.display()
            )
        })?;

        debug!(path = %self.path.display(), state = %state, "State saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Store that never touches disk. Used by dry runs and tests.
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<PersistedState>>,
    saves: Mutex<u32>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> u32 {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> PersistedState {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .unwrap_or_default()
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = Some(state.clone());
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
