//! Per-run product artifacts under `.fixer/runs/<run_id>/`.
//!
//! Distinct from tracing: these files are always written for a logged run
//! and are what the UI and post-mortems read. Layout:
//!
//! - `state.json` — loop-state snapshot, rewritten after every transition
//! - `iterations/<n>/record.json` — one file per completed step
//! - `outcome.json` — terminal structured outcome

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use crate::core::state::LoopState;
use crate::core::types::{ExecutionRecord, RunOutcome};

/// Writer for one run's artifacts.
#[derive(Debug, Clone)]
pub struct RunLog {
    dir: PathBuf,
}

impl RunLog {
    /// Create the run directory under `<root>/.fixer/runs/<run_id>`.
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(".fixer").join("runs").join(run_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create run log dir {}", dir.display()))?;
        debug!(dir = %dir.display(), "run log created");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically rewrite the loop-state snapshot.
    pub fn write_state(&self, state: &LoopState) -> Result<()> {
        write_json_atomic(&self.dir.join("state.json"), state)
    }

    /// Write the record for one completed iteration.
    pub fn write_record(&self, iter: u32, record: &ExecutionRecord) -> Result<()> {
        let iter_dir = self.dir.join("iterations").join(iter.to_string());
        fs::create_dir_all(&iter_dir)
            .with_context(|| format!("create iteration dir {}", iter_dir.display()))?;
        write_json(&iter_dir.join("record.json"), record)
    }

    /// Write the terminal outcome.
    pub fn write_outcome(&self, outcome: &RunOutcome) -> Result<()> {
        write_json_atomic(&self.dir.join("outcome.json"), outcome)
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    fs::write(path, buf).with_context(|| format!("write {}", path.display()))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
