//! In-memory transcript sink
//!
//! The transcript store proper is an external collaborator; this
//! implementation keeps entries in memory for the CLI and for tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use companion_core::{TranscriptEntry, TranscriptSink};

/// Append-only, in-memory transcript.
#[derive(Default)]
pub struct MemoryTranscript {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemoryTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries so far.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl TranscriptSink for MemoryTranscript {
    async fn append(&self, entry: TranscriptEntry) {
        tracing::debug!(
            speaker = ?entry.speaker,
            mode = %entry.mode,
            chars = entry.text.len(),
            "transcript entry"
        );
        self.entries.lock().push(entry);
    }
}
