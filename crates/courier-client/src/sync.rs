//! Synchronization state of a server-backed object.
//!
//! ```text
//!   NEW ──write──▶ SAVING ──ok──▶ SYNCED ──write──▶ SYNCING
//!    ▲               │                ▲                │
//!    └────failed─────┘                └──ok / failed───┘
//!
//!   LOADING ──ok──▶ SYNCED
//!      └──failed──▶ NEW
//! ```
//!
//! Concurrent writes are counted; the object only returns to `SYNCED` once
//! every outstanding write has completed.

use std::cell::Cell;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    /// Exists only locally.
    New,
    /// First write to the server is in flight.
    Saving,
    /// Known to the server, with further writes in flight.
    Syncing,
    /// Known to the server with no outstanding writes.
    Synced,
    /// Placeholder awaiting its first fetch.
    Loading,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncState::New => "NEW",
            SyncState::Saving => "SAVING",
            SyncState::Syncing => "SYNCING",
            SyncState::Synced => "SYNCED",
            SyncState::Loading => "LOADING",
        }
    }
}

/// A state change worth reporting: `(old, new)`.
pub type Transition = Option<(SyncState, SyncState)>;

#[derive(Debug)]
pub struct SyncTracker {
    state: Cell<SyncState>,
    pending_writes: Cell<u32>,
}

impl SyncTracker {
    pub fn new(state: SyncState) -> Self {
        Self {
            state: Cell::new(state),
            pending_writes: Cell::new(0),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.get()
    }

    pub fn pending_writes(&self) -> u32 {
        self.pending_writes.get()
    }

    pub fn is_new(&self) -> bool {
        self.state() == SyncState::New
    }

    pub fn is_saving(&self) -> bool {
        self.state() == SyncState::Saving
    }

    /// Anything past the first write: synced, syncing or loading.
    pub fn is_saved(&self) -> bool {
        !matches!(self.state(), SyncState::New | SyncState::Saving)
    }

    pub fn is_synced(&self) -> bool {
        self.state() == SyncState::Synced
    }

    pub fn is_loading(&self) -> bool {
        self.state() == SyncState::Loading
    }

    fn set(&self, next: SyncState) -> Transition {
        let prev = self.state.replace(next);
        (prev != next).then_some((prev, next))
    }

    pub fn begin_write(&self) -> Transition {
        self.pending_writes.set(self.pending_writes.get() + 1);
        match self.state() {
            SyncState::New => self.set(SyncState::Saving),
            SyncState::Synced => self.set(SyncState::Syncing),
            _ => None,
        }
    }

    pub fn complete_write(&self) -> Transition {
        let remaining = self.pending_writes.get().saturating_sub(1);
        self.pending_writes.set(remaining);
        if remaining == 0 {
            self.set(SyncState::Synced)
        } else {
            self.set(SyncState::Syncing)
        }
    }

    pub fn fail_write(&self) -> Transition {
        let remaining = self.pending_writes.get().saturating_sub(1);
        self.pending_writes.set(remaining);
        match (self.state(), remaining) {
            (SyncState::Saving, 0) => self.set(SyncState::New),
            (SyncState::Syncing, 0) => self.set(SyncState::Synced),
            _ => None,
        }
    }

    pub fn begin_load(&self) -> Transition {
        self.set(SyncState::Loading)
    }

    pub fn load_succeeded(&self) -> Transition {
        self.set(SyncState::Synced)
    }

    pub fn load_failed(&self) -> Transition {
        self.set(SyncState::New)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_round_trip() {
        let sync = SyncTracker::new(SyncState::New);
        assert_eq!(sync.begin_write(), Some((SyncState::New, SyncState::Saving)));
        assert!(sync.is_saving() && !sync.is_saved());
        assert_eq!(sync.complete_write(), Some((SyncState::Saving, SyncState::Synced)));
        assert!(sync.is_synced() && sync.is_saved());
    }

    #[test]
    fn test_overlapping_writes_wait_for_all() {
        let sync = SyncTracker::new(SyncState::Synced);
        sync.begin_write();
        sync.begin_write();
        assert_eq!(sync.state(), SyncState::Syncing);
        assert_eq!(sync.pending_writes(), 2);

        assert_eq!(sync.complete_write(), None);
        assert_eq!(sync.state(), SyncState::Syncing);
        assert_eq!(sync.complete_write(), Some((SyncState::Syncing, SyncState::Synced)));
    }

    #[test]
    fn test_create_with_follow_up_write() {
        let sync = SyncTracker::new(SyncState::New);
        sync.begin_write();
        sync.begin_write();
        assert_eq!(sync.complete_write(), Some((SyncState::Saving, SyncState::Syncing)));
        sync.complete_write();
        assert!(sync.is_synced());
    }

    #[test]
    fn test_failed_writes_roll_back() {
        let sync = SyncTracker::new(SyncState::New);
        sync.begin_write();
        assert_eq!(sync.fail_write(), Some((SyncState::Saving, SyncState::New)));

        let sync = SyncTracker::new(SyncState::Synced);
        sync.begin_write();
        assert_eq!(sync.fail_write(), Some((SyncState::Syncing, SyncState::Synced)));
        assert_eq!(sync.pending_writes(), 0);
    }

    #[test]
    fn test_load_paths() {
        let sync = SyncTracker::new(SyncState::New);
        sync.begin_load();
        assert!(sync.is_loading());
        sync.load_succeeded();
        assert!(sync.is_synced());

        let sync = SyncTracker::new(SyncState::Loading);
        assert!(sync.is_saved() && !sync.is_synced());
        assert_eq!(sync.load_failed(), Some((SyncState::Loading, SyncState::New)));
        assert!(!sync.is_saved());
    }
}
