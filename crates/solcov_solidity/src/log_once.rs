//! Once-only warning channel, keyed by message text.

use std::collections::HashSet;

use parking_lot::Mutex;

/// Deduplicates warnings by message text for the lifetime of the owning
/// value, so that a condition recurring thousands of times (e.g. the same
/// unmatched bytecode) surfaces exactly once.
#[derive(Debug, Default)]
pub struct DedupLog {
    seen: Mutex<HashSet<String>>,
}

impl DedupLog {
    /// Emits `message` as a warning unless an identical message was emitted
    /// before.
    pub fn warn_once(&self, message: String) {
        if self.seen.lock().insert(message.clone()) {
            tracing::warn!("{message}");
        }
    }

    /// Number of distinct messages emitted so far.
    pub fn emitted(&self) -> usize {
        self.seen.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_messages_are_emitted_once() {
        let log = DedupLog::default();

        log.warn_once("no artifact found for 0xabc".to_string());
        log.warn_once("no artifact found for 0xabc".to_string());
        log.warn_once("no artifact found for 0xdef".to_string());

        assert_eq!(log.emitted(), 2);
    }
}
