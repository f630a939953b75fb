//! Per-model reordering of sequenced messages.

use std::collections::BTreeMap;
use std::ops::Range;

/// Outcome of offering one message to a [`Sequencer`].
#[derive(Debug, PartialEq)]
pub struct Released<T> {
    /// Messages now deliverable, in sequence order.
    pub ready: Vec<T>,
    /// The offered message was already delivered or is already held.
    pub duplicate: bool,
    /// Sequence numbers given up on to unblock delivery.
    pub skipped: Option<Range<u64>>,
}

impl<T> Default for Released<T> {
    fn default() -> Self {
        Self {
            ready: Vec::new(),
            duplicate: false,
            skipped: None,
        }
    }
}

/// Releases messages strictly in sequence order starting at 0, holding
/// early arrivals. Once more than `max_pending` are held, the gap before
/// the oldest held message is skipped. After `u64::MAX` is released every
/// further message counts as a duplicate.
#[derive(Debug)]
pub struct Sequencer<T> {
    next: u64,
    exhausted: bool,
    held: BTreeMap<u64, T>,
    max_pending: usize,
}

impl<T> Sequencer<T> {
    pub fn new(max_pending: usize) -> Self {
        Self {
            next: 0,
            exhausted: false,
            held: BTreeMap::new(),
            max_pending: max_pending.max(1),
        }
    }

    /// The next sequence number that would be released immediately.
    pub fn expected(&self) -> u64 {
        self.next
    }

    pub fn pending(&self) -> usize {
        self.held.len()
    }

    pub fn push(&mut self, seq: u64, item: T) -> Released<T> {
        let mut out = Released::default();
        if self.exhausted || seq < self.next || self.held.contains_key(&seq) {
            out.duplicate = true;
            return out;
        }
        self.held.insert(seq, item);
        self.drain(&mut out.ready);
        if self.held.len() > self.max_pending {
            if let Some(&first) = self.held.keys().next() {
                out.skipped = Some(self.next..first);
                self.next = first;
                self.drain(&mut out.ready);
            }
        }
        out
    }

    fn drain(&mut self, ready: &mut Vec<T>) {
        while let Some(item) = self.held.remove(&self.next) {
            ready.push(item);
            match self.next.checked_add(1) {
                Some(next) => self.next = next,
                None => {
                    self.exhausted = true;
                    self.held.clear();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_in_order_and_drops_duplicates() {
        let mut seq = Sequencer::new(8);
        assert!(seq.push(1, "b").ready.is_empty());
        assert_eq!(seq.push(0, "a").ready, vec!["a", "b"]);
        assert!(seq.push(1, "b again").duplicate);
        assert_eq!(seq.push(2, "c").ready, vec!["c"]);
        assert_eq!(seq.expected(), 3);
    }

    #[test]
    fn skips_a_gap_once_too_much_is_held() {
        let mut seq = Sequencer::new(2);
        seq.push(2, 'c');
        seq.push(3, 'd');
        let out = seq.push(5, 'f');
        assert_eq!(out.skipped, Some(0..2));
        assert_eq!(out.ready, vec!['c', 'd']);
        assert_eq!(seq.pending(), 1);
        assert_eq!(seq.push(4, 'e').ready, vec!['e', 'f']);
        assert!(seq.push(0, 'a').duplicate, "skipped numbers arriving late are stale");
    }

    #[test]
    fn the_last_sequence_number_does_not_wrap() {
        let mut seq = Sequencer::new(1);
        assert!(seq.push(u64::MAX, 'a').ready.is_empty());
        let out = seq.push(u64::MAX - 1, 'b');
        assert_eq!(out.ready, vec!['b', 'a']);
        assert_eq!(out.skipped, Some(0..u64::MAX - 1));
        assert!(seq.push(0, 'c').duplicate);
        assert!(seq.push(5, 'd').duplicate);
        assert_eq!(seq.pending(), 0);
    }
}
