//! Audit artifacts for finished repair sessions.
//!
//! Layout under the chosen directory:
//!
//! ```text
//! <session_id>/session.json
//! <session_id>/<n>/code.py
//! <session_id>/<n>/outcome.json
//! <session_id>/<n>/patch.diff     (only when a candidate was produced)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{RepairIteration, RepairSession};

#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub session_path: PathBuf,
}

impl SessionPaths {
    pub fn new(root: &Path, session_id: &str) -> Self {
        let dir = root.join(session_id);
        Self {
            session_path: dir.join("session.json"),
            dir,
        }
    }

    pub fn iteration_dir(&self, index: u32) -> PathBuf {
        self.dir.join(index.to_string())
    }
}

pub fn write_session_log(root: &Path, session: &RepairSession) -> Result<SessionPaths> {
    let paths = SessionPaths::new(root, &session.session_id);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create session dir {}", paths.dir.display()))?;

    write_json(&paths.session_path, session)?;
    for iteration in &session.iterations {
        write_iteration(&paths.iteration_dir(iteration.index), iteration)?;
    }
    Ok(paths)
}

fn write_iteration(dir: &Path, iteration: &RepairIteration) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create iteration dir {}", dir.display()))?;
    write_text(&dir.join("code.py"), &iteration.code_at_start)?;
    write_json(&dir.join("outcome.json"), &iteration.outcome)?;
    if let Some(candidate) = &iteration.candidate {
        write_text(&dir.join("patch.diff"), &candidate.unified_diff)?;
    }
    Ok(())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_text(path, &buf)
}
