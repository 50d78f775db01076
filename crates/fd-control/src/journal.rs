//! Append-only operation journal
//!
//! Entries live in a bounded in-memory ring and, when a path is given, are
//! appended to a JSON-lines file. A completion appends a second line with the
//! same operation id; on reload the last line per id wins.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use fd_core::error::JournalError;
use fd_core::model::OperationJournalEntry;
use fd_core::types::{OperationId, OperationStatus, TargetId};

/// Entries kept in memory
pub const DEFAULT_JOURNAL_CAPACITY: usize = 1000;

pub struct OperationJournal {
    entries: RwLock<VecDeque<OperationJournalEntry>>,
    capacity: usize,
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl OperationJournal {
    /// Journal that is never written to disk
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            file: None,
            path: None,
        }
    }

    /// Open (or create) a journal file and reload its most recent entries
    pub fn open(path: &Path, capacity: usize) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries: VecDeque<OperationJournalEntry> = VecDeque::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<OperationJournalEntry>(&line) {
                    Ok(entry) => {
                        if let Some(existing) = entries
                            .iter_mut()
                            .find(|e| e.operation_id == entry.operation_id)
                        {
                            *existing = entry;
                        } else {
                            entries.push_back(entry);
                            if entries.len() > capacity {
                                entries.pop_front();
                            }
                        }
                    }
                    Err(e) => tracing::warn!("Skipping corrupt journal line: {}", e),
                }
            }
            tracing::info!("Loaded {} journal entries from {:?}", entries.len(), path);
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            entries: RwLock::new(entries),
            capacity: capacity.max(1),
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Start an operation
    pub fn begin(
        &self,
        kind: &str,
        target_id: Option<TargetId>,
        message: impl Into<String>,
    ) -> OperationId {
        let entry = OperationJournalEntry {
            operation_id: OperationId::generate(),
            kind: kind.to_string(),
            target_id,
            status: OperationStatus::Started,
            started_at: Utc::now(),
            ended_at: None,
            message: message.into(),
            error: None,
        };
        let id = entry.operation_id.clone();
        tracing::debug!(operation_id = %id, kind, "Operation started");
        self.append(entry);
        id
    }

    /// Move a started operation to a terminal status. Terminal entries never change again.
    pub fn complete(
        &self,
        id: &OperationId,
        status: OperationStatus,
        message: Option<String>,
        error: Option<String>,
    ) -> Result<OperationJournalEntry, JournalError> {
        let updated = {
            let mut entries = self.entries.write();
            let entry = entries
                .iter_mut()
                .find(|e| &e.operation_id == id)
                .ok_or_else(|| JournalError::UnknownOperation(id.clone()))?;
            if entry.is_terminal() {
                return Err(JournalError::AlreadyCompleted(id.clone()));
            }
            entry.status = if status == OperationStatus::Started {
                OperationStatus::Failed
            } else {
                status
            };
            entry.ended_at = Some(Utc::now());
            if let Some(message) = message {
                entry.message = message;
            }
            entry.error = error;
            entry.clone()
        };

        tracing::debug!(operation_id = %id, status = %updated.status, "Operation completed");
        self.persist(&updated);
        Ok(updated)
    }

    /// Journal an operation that starts and ends at once
    pub fn record(
        &self,
        kind: &str,
        target_id: Option<TargetId>,
        status: OperationStatus,
        message: impl Into<String>,
        error: Option<String>,
    ) -> OperationId {
        let id = self.begin(kind, target_id, message);
        if status != OperationStatus::Started {
            if let Err(e) = self.complete(&id, status, None, error) {
                tracing::warn!("Failed to complete journal entry {}: {}", id, e);
            }
        }
        id
    }

    pub fn get(&self, id: &OperationId) -> Option<OperationJournalEntry> {
        self.entries
            .read()
            .iter()
            .find(|e| &e.operation_id == id)
            .cloned()
    }

    /// Up to `limit` entries, most recent first
    pub fn recent(&self, limit: usize) -> Vec<OperationJournalEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn append(&self, entry: OperationJournalEntry) {
        self.persist(&entry);
        let mut entries = self.entries.write();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    fn persist(&self, entry: &OperationJournalEntry) {
        let Some(file) = &self.file else {
            return;
        };
        let result = serde_json::to_string(entry)
            .map_err(std::io::Error::from)
            .and_then(|mut line| {
                line.push('\n');
                let mut file = file.lock();
                file.write_all(line.as_bytes())?;
                file.flush()
            });
        if let Err(e) = result {
            tracing::error!(operation_id = %entry.operation_id, "Failed to append journal entry: {}", e);
        }
    }
}
