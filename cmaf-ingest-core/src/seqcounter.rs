//! Sequence counter (component C): a sparse-in-space sliding window counting
//! how many tracks have delivered each sequence number.
//!
//! Backed by a `BTreeMap<seqNr, count>` rather than the fixed-size shifting
//! array the window size might suggest — a sparse ordered map gives the same
//! externally observable eviction/lookup behavior with none of the
//! prefix/suffix-shift bookkeeping a preallocated array would need, and nets
//! out more idiomatic for a component whose own doc calls itself
//! "sparse-in-space".

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug)]
pub struct SeqCounter {
    capacity: u32,
    entries: BTreeMap<u32, u32>,
}

impl SeqCounter {
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::BufferCapacityZero);
        }
        Ok(SeqCounter {
            capacity,
            entries: BTreeMap::new(),
        })
    }

    pub fn newest(&self) -> Option<u32> {
        self.entries.keys().next_back().copied()
    }

    pub fn oldest(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one track's delivery of `seq_nr`. New maxima slide the window
    /// forward and evict anything that falls below `newest - capacity + 1`;
    /// arrivals older than the window floor are dropped silently; anything
    /// else increments (or creates, for an in-window gap) that entry's count.
    pub fn add(&mut self, seq_nr: u32) {
        let newest = match self.newest() {
            Some(n) => n,
            None => {
                self.entries.insert(seq_nr, 1);
                return;
            }
        };

        if seq_nr > newest {
            self.entries.insert(seq_nr, 1);
            self.evict_below(seq_nr);
            return;
        }

        let floor = newest.saturating_sub(self.capacity - 1);
        if seq_nr < floor {
            return;
        }

        *self.entries.entry(seq_nr).or_insert(0) += 1;
    }

    fn evict_below(&mut self, newest: u32) {
        let floor = newest.saturating_sub(self.capacity - 1);
        self.entries.retain(|&seq, _| seq >= floor);
    }

    /// Change the window capacity, immediately evicting anything now out of range.
    pub fn resize(&mut self, new_capacity: u32) -> Result<()> {
        if new_capacity == 0 {
            return Err(Error::BufferCapacityZero);
        }
        self.capacity = new_capacity;
        if let Some(newest) = self.newest() {
            self.evict_below(newest);
        }
        Ok(())
    }

    /// Remove a specific sequence number from the window, if present.
    pub fn drop(&mut self, seq_nr: u32) {
        self.entries.remove(&seq_nr);
    }

    /// Scanning from the newest entry backward, the largest `seqNr >
    /// max_seen` whose count equals `nr_tracks`; `0` if none qualifies.
    pub fn new_full_counter(&self, nr_tracks: u32, max_seen: u32) -> u32 {
        self.entries
            .iter()
            .rev()
            .find(|&(&seq, &count)| seq > max_seen && count == nr_tracks)
            .map(|(&seq, _)| seq)
            .unwrap_or(0)
    }

    /// The longest contiguous run of sequence numbers in the window whose
    /// every member has `count == nr_tracks` (no internal gaps). Ties are
    /// broken toward whichever run ends later.
    pub fn full_range(&self, nr_tracks: u32) -> Option<(u32, u32)> {
        let mut best: Option<(u32, u32)> = None;
        let mut run_start: Option<u32> = None;
        let mut prev_seq: Option<u32> = None;

        for (&seq, &count) in self.entries.iter() {
            let contiguous = prev_seq == Some(seq - 1);
            let full = count == nr_tracks;

            if full {
                run_start = if contiguous { run_start } else { Some(seq) };
                let candidate = (run_start.unwrap(), seq);
                best = Some(match best {
                    None => candidate,
                    Some(b) => {
                        let cur_len = candidate.1 - candidate.0;
                        let best_len = b.1 - b.0;
                        if cur_len >= best_len {
                            candidate
                        } else {
                            b
                        }
                    }
                });
            } else {
                run_start = None;
            }
            prev_seq = Some(seq);
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(SeqCounter::new(0), Err(Error::BufferCapacityZero)));
    }

    #[test]
    fn counts_per_track_arrivals() {
        let mut c = SeqCounter::new(10).unwrap();
        c.add(5);
        c.add(5);
        c.add(5);
        assert_eq!(c.new_full_counter(3, 0), 5);
        assert_eq!(c.new_full_counter(4, 0), 0);
    }

    #[test]
    fn hole_tolerance_matches_spec_scenario() {
        let mut c = SeqCounter::new(5).unwrap();
        for seq in [10, 11, 12, 14] {
            c.add(seq);
        }
        assert_eq!(c.full_range(1), Some((10, 12)));

        for seq in [15, 16] {
            c.add(seq);
        }
        assert_eq!(c.full_range(1), Some((14, 16)));
    }

    #[test]
    fn window_slides_and_drops_stale_arrivals() {
        let mut c = SeqCounter::new(3).unwrap();
        for seq in 1..=10u32 {
            c.add(seq);
        }
        assert_eq!(c.oldest(), Some(8));
        assert_eq!(c.newest(), Some(10));

        // an arrival far behind the window is dropped silently, not inserted
        c.add(1);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn explicit_drop_removes_entry() {
        let mut c = SeqCounter::new(5).unwrap();
        c.add(1);
        c.add(2);
        c.drop(1);
        assert_eq!(c.oldest(), Some(2));
    }
}
