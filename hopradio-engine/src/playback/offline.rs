//! Offline mix navigation.
//!
//! Holds the downloaded playlist and a cursor into it. Navigation wraps
//! in both directions, for endless repeat of the mix.

use hopradio_common::{OfflineEntry, Track};

pub struct OfflineController {
    entries: Vec<OfflineEntry>,
    index: usize,
}

impl OfflineController {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: 0,
        }
    }

    /// Replace the playlist and rewind to the first entry.
    pub fn set_entries(&mut self, entries: Vec<OfflineEntry>) {
        self.entries = entries;
        self.index = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> Option<&OfflineEntry> {
        self.entries.get(self.index)
    }

    /// The entry after the cursor, wrapping.
    pub fn peek_next(&self) -> Option<&OfflineEntry> {
        if self.entries.is_empty() {
            return None;
        }
        self.entries.get((self.index + 1) % self.entries.len())
    }

    /// Move the cursor by `step` entries, wrapping in both directions.
    pub fn advance(&mut self, step: i64) {
        if self.entries.is_empty() {
            return;
        }
        let len = self.entries.len() as i64;
        self.index = (self.index as i64 + step).rem_euclid(len) as usize;
    }

    /// Display track for the current entry; the id is the playlist
    /// position.
    pub fn current_track(&self) -> Option<Track> {
        self.current().map(|e| e.as_track(self.index as u64))
    }
}

impl Default for OfflineController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: usize) -> Vec<OfflineEntry> {
        (0..n)
            .map(|i| OfflineEntry {
                locator: format!("mem://offline/{i}"),
                title: format!("entry {i}"),
                artist: String::new(),
            })
            .collect()
    }

    #[test]
    fn next_from_last_entry_wraps_to_first() {
        let mut ctrl = OfflineController::new();
        ctrl.set_entries(entries(3));
        ctrl.advance(2);
        assert_eq!(ctrl.index(), 2);
        ctrl.advance(1);
        assert_eq!(ctrl.index(), 0);
    }

    #[test]
    fn previous_from_first_entry_wraps_to_last() {
        let mut ctrl = OfflineController::new();
        ctrl.set_entries(entries(4));
        ctrl.advance(-1);
        assert_eq!(ctrl.index(), 3);
    }

    #[test]
    fn replacing_entries_rewinds_the_cursor() {
        let mut ctrl = OfflineController::new();
        ctrl.set_entries(entries(5));
        ctrl.advance(3);
        ctrl.set_entries(entries(2));
        assert_eq!(ctrl.index(), 0);
        assert_eq!(ctrl.len(), 2);
    }

    #[test]
    fn empty_playlist_navigation_is_a_no_op() {
        let mut ctrl = OfflineController::new();
        ctrl.advance(1);
        ctrl.advance(-1);
        assert!(ctrl.current().is_none());
        assert!(ctrl.peek_next().is_none());
        assert!(ctrl.current_track().is_none());
    }

    #[test]
    fn peek_next_wraps_too() {
        let mut ctrl = OfflineController::new();
        ctrl.set_entries(entries(2));
        ctrl.advance(1);
        assert_eq!(ctrl.peek_next().unwrap().title, "entry 0");
    }
}
