//! Per-track segment-data buffer (component B): a bounded, gap-tolerant,
//! strictly-increasing sequence of `RecSegData`, one per track.

use std::collections::VecDeque;

use crate::error::{Error, Result};

/// Flags carried alongside one recorded segment (spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecSegFlags {
    /// `styp` carried the `lmsg` brand: this is the stream's last segment.
    pub is_lmsg: bool,
    /// `emsg` carried the slate-marker scheme (blank/filler content).
    pub is_slate: bool,
    /// Synthesized placeholder for a sequence number never actually received.
    pub is_missing: bool,
    /// The chunk parser delivered the full `moof`+`mdat`, not a truncated remainder.
    pub is_complete: bool,
    /// The channel had already switched to shifted seq/time numbering when this arrived.
    pub is_shifted: bool,
}

/// One completed media segment, as handed from the receiver to the channel's
/// inbound queue (spec §3).
#[derive(Debug, Clone)]
pub struct RecSegData {
    pub track_name: String,
    pub dts: u64,
    pub seq_nr: u32,
    pub duration: u32,
    pub total_size: u32,
    pub nr_samples: u16,
    pub flags: RecSegFlags,
}

/// Bounded, per-track ring of `RecSegData` kept in strictly increasing
/// `seqNr`. Tolerates holes; rejects duplicates and non-increasing inserts.
#[derive(Debug)]
pub struct SegDataBuffer {
    capacity: u32,
    items: VecDeque<RecSegData>,
}

impl SegDataBuffer {
    pub fn new(capacity: u32) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::BufferCapacityZero);
        }
        Ok(SegDataBuffer {
            capacity,
            items: VecDeque::new(),
        })
    }

    /// Insert `item`. Fails if `item.seq_nr` is not strictly greater than the
    /// newest item already present. On success, evicts any now-oldest items
    /// whose `seq_nr` is `<= newest - capacity`; the new item is always kept.
    pub fn add(&mut self, item: RecSegData) -> Result<()> {
        if let Some(last) = self.items.back() {
            if item.seq_nr <= last.seq_nr {
                return Err(Error::DuplicateOrOutOfOrder {
                    seq_nr: item.seq_nr,
                    last_seq_nr: last.seq_nr,
                });
            }
        }
        let newest = item.seq_nr;
        self.items.push_back(item);
        self.evict_below(newest);
        Ok(())
    }

    fn evict_below(&mut self, newest: u32) {
        let floor = newest.saturating_sub(self.capacity);
        while let Some(front) = self.items.front() {
            if front.seq_nr <= floor {
                self.items.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn get_by_seq_nr(&self, seq_nr: u32) -> Option<&RecSegData> {
        self.items.iter().find(|i| i.seq_nr == seq_nr)
    }

    /// Overwrite the `duration` of the most recently inserted item. Used when
    /// a track's cadence is only known after the fact (spec §4.E).
    pub fn set_latest_duration(&mut self, duration: u32) -> Result<()> {
        match self.items.back_mut() {
            Some(item) => {
                item.duration = duration;
                Ok(())
            }
            None => Err(Error::InternalInconsistency(
                "setLatestDuration called on an empty buffer".into(),
            )),
        }
    }

    /// Change capacity, immediately evicting anything now out of range.
    pub fn resize(&mut self, new_capacity: u32) -> Result<()> {
        if new_capacity == 0 {
            return Err(Error::BufferCapacityZero);
        }
        self.capacity = new_capacity;
        if let Some(newest) = self.items.back().map(|i| i.seq_nr) {
            self.evict_below(newest);
        }
        Ok(())
    }

    pub fn drop_seq_nr(&mut self, seq_nr: u32) {
        self.items.retain(|i| i.seq_nr != seq_nr);
    }

    /// Remove and return the seq numbers of any leading run of items whose
    /// `is_shifted` flag is false — the pre-shift history discarded once a
    /// channel transitions to shifted numbering.
    pub fn remove_leading_unshifted(&mut self) -> Vec<u32> {
        let mut removed = Vec::new();
        while let Some(front) = self.items.front() {
            if front.flags.is_shifted {
                break;
            }
            removed.push(front.seq_nr);
            self.items.pop_front();
        }
        removed
    }

    pub fn nr_items(&self) -> usize {
        self.items.len()
    }

    pub fn newest_seq_nr(&self) -> Option<u32> {
        self.items.back().map(|i| i.seq_nr)
    }

    pub fn oldest_seq_nr(&self) -> Option<u32> {
        self.items.front().map(|i| i.seq_nr)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecSegData> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(seq_nr: u32, dts: u64, duration: u32) -> RecSegData {
        RecSegData {
            track_name: "video".into(),
            dts,
            seq_nr,
            duration,
            total_size: 1000,
            nr_samples: 1,
            flags: RecSegFlags::default(),
        }
    }

    #[test]
    fn rejects_duplicate_and_out_of_order() {
        let mut buf = SegDataBuffer::new(5).unwrap();
        buf.add(item(10, 0, 100)).unwrap();
        buf.add(item(11, 100, 100)).unwrap();
        let err = buf.add(item(11, 200, 100)).unwrap_err();
        assert!(matches!(err, Error::DuplicateOrOutOfOrder { .. }));
        let err = buf.add(item(9, 300, 100)).unwrap_err();
        assert!(matches!(err, Error::DuplicateOrOutOfOrder { .. }));
    }

    #[test]
    fn tolerates_gaps() {
        let mut buf = SegDataBuffer::new(10).unwrap();
        buf.add(item(10, 0, 100)).unwrap();
        buf.add(item(12, 200, 100)).unwrap(); // 11 skipped
        assert_eq!(buf.nr_items(), 2);
        assert!(buf.get_by_seq_nr(11).is_none());
        assert!(buf.get_by_seq_nr(12).is_some());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut buf = SegDataBuffer::new(3).unwrap();
        for seq in 1..=6u32 {
            buf.add(item(seq, seq as u64 * 100, 100)).unwrap();
        }
        // newest=6, capacity=3: floor = 3, items with seq_nr <= 3 evicted.
        assert_eq!(buf.oldest_seq_nr(), Some(4));
        assert_eq!(buf.newest_seq_nr(), Some(6));
    }

    #[test]
    fn remove_leading_unshifted_stops_at_first_shifted() {
        let mut buf = SegDataBuffer::new(10).unwrap();
        let mut a = item(1, 0, 100);
        a.flags.is_shifted = false;
        let mut b = item(2, 100, 100);
        b.flags.is_shifted = false;
        let mut c = item(3, 200, 100);
        c.flags.is_shifted = true;
        buf.add(a).unwrap();
        buf.add(b).unwrap();
        buf.add(c).unwrap();

        let removed = buf.remove_leading_unshifted();
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(buf.nr_items(), 1);
        assert_eq!(buf.oldest_seq_nr(), Some(3));
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(
            SegDataBuffer::new(0),
            Err(Error::BufferCapacityZero)
        ));
    }
}
