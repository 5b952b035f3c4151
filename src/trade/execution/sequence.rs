use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-identity submission counter. Every stamped value is committed, acknowledged or not,
/// so two submissions can never share a value.
#[derive(Debug, Default)]
pub struct SubmissionSequence {
    next: AtomicU64,
    synced: AtomicBool,
}

impl SubmissionSequence {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            synced: AtomicBool::new(true),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn sync(&self, venue_next: u64) {
        let current = self.next.load(Ordering::SeqCst);
        // never move backwards; a lagging venue read must not cause a replay
        self.next.store(current.max(venue_next), Ordering::SeqCst);
        self.synced.store(true, Ordering::SeqCst);
    }

    /// Forces a re-read from the venue before the next submission.
    pub fn invalidate(&self) {
        self.synced.store(false, Ordering::SeqCst);
    }

    pub fn current(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn commit(&self, used: u64) {
        let _ = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                Some(next.max(used.saturating_add(1)))
            });
    }
}
