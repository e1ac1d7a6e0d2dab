//! Append-only JSON-lines journal backing a durable ledger.

use super::LedgerEntry;
use crate::error::LedgerError;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// One [`LedgerEntry`] per line. Hashes and signatures are stored as hex of
/// their exact bytes, so signatures re-verify bit-for-bit after a restart.
///
/// A record only counts once its terminating newline is on disk. An
/// unterminated final line is the remains of an interrupted append and is cut
/// off on open; a bad line anywhere else fails the open.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    len: u64,
    /// Set when a failed append could not be rolled back. No further writes
    /// are accepted, since they would land after a partial record.
    poisoned: bool,
}

impl Journal {
    /// Open or create the journal and read back every stored entry.
    pub fn open(path: &Path) -> Result<(Self, Vec<LedgerEntry>), LedgerError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = if path.exists() { std::fs::read(path)? } else { Vec::new() };
        let (entries, committed) = Self::parse(path, &bytes)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if committed < bytes.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() - committed,
                "discarding unterminated journal record"
            );
            file.set_len(committed as u64)?;
            file.sync_data()?;
        }
        let len = committed as u64;
        Ok((Self { path: path.to_path_buf(), file, len, poisoned: false }, entries))
    }

    /// Parse newline-terminated records. Returns the entries and the byte
    /// length of the terminated prefix.
    fn parse(path: &Path, bytes: &[u8]) -> Result<(Vec<LedgerEntry>, usize), LedgerError> {
        let mut entries = Vec::new();
        let mut offset = 0;
        for (lineno, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
            if line.last() != Some(&b'\n') {
                break;
            }
            offset += line.len();
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let entry = serde_json::from_slice(line).map_err(|e| LedgerError::Journal {
                message: format!("{}:{}: {}", path.display(), lineno + 1, e),
            })?;
            entries.push(entry);
        }
        Ok((entries, offset))
    }

    /// Write and sync one entry. On failure the file is cut back to its
    /// previous length; if that fails too the journal refuses further writes.
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        if self.poisoned {
            return Err(LedgerError::Journal {
                message: format!(
                    "{}: a failed append could not be rolled back; reopen to recover",
                    self.path.display()
                ),
            });
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let written = self
            .file
            .write_all(&line)
            .and_then(|_| self.file.sync_data());
        if let Err(write_error) = written {
            if let Err(rollback_error) = self.file.set_len(self.len) {
                self.poisoned = true;
                warn!(
                    path = %self.path.display(),
                    error = %rollback_error,
                    "journal rollback failed; refusing further appends"
                );
                return Err(LedgerError::Journal {
                    message: format!(
                        "write failed: {}; rollback failed: {}",
                        write_error, rollback_error
                    ),
                });
            }
            return Err(write_error.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, AgentId, Hash256, Trace};
    use ed25519_dalek::SigningKey;

    fn entry() -> LedgerEntry {
        let key = SigningKey::from_bytes(&[1; 32]);
        let action = Action::new(AgentId::new("a"), "STEP", 1, 1);
        let trace = Trace::seal(action.id(), Hash256::GENESIS, Hash256::GENESIS, Hash256::GENESIS, &key);
        LedgerEntry { action, trace }
    }

    #[test]
    fn failed_rollback_poisons_journal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("j.jsonl");
        std::fs::write(&path, b"").unwrap();
        // A read-only handle fails both the write and the truncation.
        let mut journal = Journal {
            path: path.clone(),
            file: File::open(&path).unwrap(),
            len: 0,
            poisoned: false,
        };

        let first = journal.append(&entry()).unwrap_err();
        assert!(matches!(first, LedgerError::Journal { ref message } if message.contains("rollback failed")));
        assert!(journal.poisoned);
        let second = journal.append(&entry()).unwrap_err();
        assert!(matches!(second, LedgerError::Journal { ref message } if message.contains("reopen to recover")));
        assert_eq!(journal.path(), path.as_path());
    }

    #[test]
    fn unterminated_tail_is_not_committed() {
        let path = Path::new("j.jsonl");
        let mut bytes = serde_json::to_vec(&entry()).unwrap();
        bytes.push(b'\n');
        let committed = bytes.len();
        bytes.extend_from_slice(&serde_json::to_vec(&entry()).unwrap());

        let (entries, offset) = Journal::parse(path, &bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(offset, committed);
    }

    #[test]
    fn corrupt_terminated_line_fails() {
        let path = Path::new("j.jsonl");
        let mut bytes = b"{\"action\":\n".to_vec();
        bytes.extend_from_slice(&serde_json::to_vec(&entry()).unwrap());
        bytes.push(b'\n');
        assert!(matches!(
            Journal::parse(path, &bytes),
            Err(LedgerError::Journal { ref message }) if message.starts_with("j.jsonl:1:")
        ));
    }
}
