//! Pattern ingestion: scale snapping and seed pattern files.
//!
//! Seed files are JSON documents of the form
//! `{"tracks": [{"notes": [{"name": "G3", "time": 0.0}, ...]}, ...]}`,
//! produced by the offline pattern tools and dropped into a directory.

use crate::scale::snap_to_scale;
use crate::types::{Note, Pattern, Track};
use log::{debug, info, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read pattern file: {0}")]
    Io(#[from] io::Error),
    #[error("failed to parse pattern JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a scale-snapped copy of `pattern`. Every note's pitch becomes
/// the nearest scale member; onsets and track layout are untouched.
pub fn ingest(pattern: &Pattern) -> Pattern {
    Pattern {
        tracks: pattern
            .tracks
            .iter()
            .map(|track| Track {
                notes: track
                    .notes
                    .iter()
                    .map(|n| Note {
                        pitch: snap_to_scale(&n.pitch).to_string(),
                        onset_secs: n.onset_secs,
                    })
                    .collect(),
            })
            .collect(),
    }
}

/// Directory of named seed patterns (`<dir>/<name>.json`).
#[derive(Debug, Clone)]
pub struct PatternStore {
    dir: PathBuf,
}

impl PatternStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a seed name to its file, rejecting anything that could
    /// escape the store directory.
    fn path_for(&self, name: &str) -> Option<PathBuf> {
        let name = name.trim();
        if name.is_empty()
            || name.contains("..")
            || name.contains('/')
            || name.contains('\\')
        {
            return None;
        }
        Some(self.dir.join(format!("{}.json", name)))
    }

    /// Read a seed pattern. `Ok(None)` if no such seed exists.
    pub fn read(&self, name: &str) -> Result<Option<Pattern>, PatternError> {
        let Some(path) = self.path_for(name) else {
            return Ok(None);
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let value: serde_json::Value = serde_json::from_str(&text)?;
        Ok(Some(Pattern::from_value(&value)))
    }

    /// Load a seed pattern, treating every failure as "absent".
    pub fn load(&self, name: &str) -> Option<Pattern> {
        match self.read(name) {
            Ok(Some(p)) => {
                info!("Loaded seed pattern '{}' ({} notes)", name, p.note_count());
                Some(p)
            }
            Ok(None) => {
                debug!("No seed pattern named '{}' in {}", name, self.dir.display());
                None
            }
            Err(e) => {
                warn!("Seed pattern '{}' unusable: {}", name, e);
                None
            }
        }
    }

    /// Names of all seeds currently in the directory, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().and_then(|x| x.to_str()) != Some("json") {
                            return None;
                        }
                        path.file_stem()
                            .and_then(|s| s.to_str())
                            .map(|s| s.to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
