use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::stats::{TranscriptEntry, TranscriptRole};

/// Append-only call transcript
///
/// Callers get copies; only the session appends. Once closed at the end of
/// the call, appends are dropped.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    items: Vec<TranscriptEntry>,
    closed: bool,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(
        &self,
        role: TranscriptRole,
        text: impl Into<String>,
    ) -> Option<TranscriptEntry> {
        let mut entries = self.lock();
        let text = text.into();
        if entries.closed {
            debug!("Transcript closed, dropping {:?} entry", role);
            return None;
        }
        let entry = TranscriptEntry {
            role,
            text,
            timestamp: Utc::now(),
        };
        entries.items.push(entry.clone());
        Some(entry)
    }

    pub(crate) fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
