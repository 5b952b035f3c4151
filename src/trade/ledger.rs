use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::trade::position::PairPosition;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger {path} is not a JSON list: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of reading the ledger: valid records plus the ones rejected as stale.
#[derive(Debug, Default)]
pub struct LoadedLedger {
    pub positions: Vec<PairPosition>,
    pub rejected: Vec<String>,
}

/// JSON file holding every tracked pair. Always rewritten whole.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty ledger. Malformed records are skipped and reported.
    pub fn load(&self) -> Result<LoadedLedger, LedgerError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadedLedger::default())
            }
            Err(source) => {
                return Err(LedgerError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(LoadedLedger::default());
        }
        let raw: Vec<serde_json::Value> =
            serde_json::from_str(&content).map_err(|source| LedgerError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        let mut loaded = LoadedLedger::default();
        for (idx, value) in raw.into_iter().enumerate() {
            let parsed = serde_json::from_value::<PairPosition>(value)
                .map_err(|e| e.to_string())
                .and_then(|pos| pos.validate().map(|_| pos));
            match parsed {
                Ok(pos) => loaded.positions.push(pos),
                Err(reason) => {
                    log::warn!(
                        "[LEDGER] dropping stale record #{} from {}: {}",
                        idx,
                        self.path.display(),
                        reason
                    );
                    loaded.rejected.push(format!("record #{}: {}", idx, reason));
                }
            }
        }
        Ok(loaded)
    }

    /// Replaces the whole ledger via a temp file + rename.
    pub fn save(&self, positions: &[PairPosition]) -> Result<(), LedgerError> {
        let json = serde_json::to_string_pretty(positions)?;
        let tmp_path = self.tmp_path();
        let io_err = |source| LedgerError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        {
            let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
            file.write_all(json.as_bytes()).map_err(io_err)?;
            file.sync_all().map_err(io_err)?;
        }
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        log::debug!(
            "[LEDGER] wrote {} record(s) to {}",
            positions.len(),
            self.path.display()
        );
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
