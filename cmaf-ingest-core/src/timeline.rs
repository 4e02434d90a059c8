//! Segment-timeline generator (component D): owns one `SegDataBuffer` per
//! track and one `SeqCounter` behind a single mutex, and rewrites
//! `manifest_timeline_nr.mpd` whenever a new sequence number becomes fully
//! covered by every track.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use parking_lot::Mutex;

use crate::buffer::{RecSegData, SegDataBuffer};
use crate::error::{Error, Result};
use crate::mpd::{compress_timeline, Mpd, SegmentTemplate};
use crate::seqcounter::SeqCounter;

const PRE_CADENCE_BUFFER_CAPACITY: u32 = 16;

struct Inner {
    buffers: HashMap<String, SegDataBuffer>,
    counter: SeqCounter,
    started: bool,
    shifted: bool,
    nr_tracks: u32,
    latest_emitted_seq_nr: u32,
    window_size: u32,
}

/// Cyclic coupling with `Channel` is resolved the way the spec prescribes —
/// by taking the channel's data as a parameter to MPD generation rather than
/// holding a back-pointer — but narrowed here to just the pieces generation
/// actually needs (the channel's fixed-duration `Mpd` skeleton, one
/// representation per track keyed by track name) instead of the whole
/// `Channel`, to avoid a literal circular type dependency between this
/// module and `channel`.
pub struct SegmentTimelineGenerator {
    inner: Mutex<Inner>,
}

impl SegmentTimelineGenerator {
    pub fn new() -> Self {
        SegmentTimelineGenerator {
            inner: Mutex::new(Inner {
                buffers: HashMap::new(),
                counter: SeqCounter::new(PRE_CADENCE_BUFFER_CAPACITY)
                    .expect("nonzero constant capacity"),
                started: false,
                shifted: false,
                nr_tracks: 0,
                latest_emitted_seq_nr: 0,
                window_size: PRE_CADENCE_BUFFER_CAPACITY,
            }),
        }
    }

    /// Record one track's completed segment. Returns the next fully-covered
    /// sequence number greater than `latestEmittedSeqNr` once the generator
    /// has `start`ed, else `0`. A duplicate/out-of-order item for its track
    /// is reported as `ProtocolSemantic` rather than failing the whole call.
    pub fn add_segment_data(&self, item: RecSegData) -> Result<u32> {
        let mut inner = self.inner.lock();

        if inner.started && inner.shifted && !item.flags.is_shifted {
            return Err(Error::ProtocolSemantic(format!(
                "dropping pre-shift segment {} for track {} after shift transition",
                item.seq_nr, item.track_name
            )));
        }

        let track_name = item.track_name.clone();
        let seq_nr = item.seq_nr;
        let window_size = inner.window_size;
        let buffer = inner
            .buffers
            .entry(track_name.clone())
            .or_insert_with(|| SegDataBuffer::new(window_size).expect("nonzero window size"));

        match buffer.add(item) {
            Ok(()) => {}
            Err(Error::DuplicateOrOutOfOrder {
                seq_nr: rejected_seq_nr,
                last_seq_nr,
            }) => {
                return Err(Error::ProtocolSemantic(format!(
                    "track {track_name}: seqNr {rejected_seq_nr} is not greater than last seqNr {last_seq_nr}"
                )));
            }
            Err(other) => return Err(other),
        }

        inner.counter.add(seq_nr);

        if !inner.started {
            return Ok(0);
        }
        let nr_tracks = inner.nr_tracks;
        let latest = inner.latest_emitted_seq_nr;
        Ok(inner.counter.new_full_counter(nr_tracks, latest))
    }

    /// Transition into the running state: resize every buffer and the
    /// counter to the cadence-derived window size, discard each track's
    /// pre-cadence (unshifted) history, and fix `nrTracks` at the count of
    /// tracks known right now. Tracks added later are not retroactively
    /// considered by `fullRange`.
    pub fn start(&self, new_window_size: u32, is_shifted: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.started = true;
        inner.shifted = is_shifted;
        inner.window_size = new_window_size;
        inner.nr_tracks = inner.buffers.len() as u32;
        inner.counter.resize(new_window_size)?;

        for buffer in inner.buffers.values_mut() {
            buffer.resize(new_window_size)?;
            buffer.remove_leading_unshifted();
        }
        Ok(())
    }

    /// Rewrite `manifest_timeline_nr.mpd` under `storage_dir`, atomically.
    /// `base_mpd` supplies the adaptation-set/representation shape already
    /// built for `manifest.mpd`; this clones it and replaces each
    /// representation's `SegmentTemplate` with a `SegmentTimeline` covering
    /// `[first, last] = counter.fullRange(nrTracks)`. Representation ids are
    /// expected to equal their track names.
    pub fn generate_segment_timeline_mpd(
        &self,
        new_latest_seq_nr: u32,
        base_mpd: &Mpd,
        storage_dir: &Path,
    ) -> Result<String> {
        let mut inner = self.inner.lock();

        let (first, last) = inner
            .counter
            .full_range(inner.nr_tracks)
            .ok_or_else(|| Error::InternalInconsistency("fullRange is empty".into()))?;

        if !(inner.latest_emitted_seq_nr < new_latest_seq_nr && new_latest_seq_nr <= last) {
            return Err(Error::InternalInconsistency(format!(
                "monotonicity violated: latestEmitted={} newLatest={} last={}",
                inner.latest_emitted_seq_nr, new_latest_seq_nr, last
            )));
        }

        let mut out_mpd = base_mpd.clone();
        for adapt_set in &mut out_mpd.adaptation_sets {
            let (timescale, init, media) = adapt_set.segment_template.timescale_init_media();
            let (init, media) = (init.to_string(), media.to_string());

            // All representations in one adaptation set share a SegmentTemplate,
            // so every one of them must cover [first, last]; the shared S-list
            // itself is read from whichever representation is listed first.
            let mut shared_entries: Option<Vec<(u64, u32)>> = None;
            for rep in &adapt_set.representations {
                let buffer = inner.buffers.get(&rep.id).ok_or_else(|| {
                    Error::InternalInconsistency(format!("missing buffer for representation {}", rep.id))
                })?;

                let mut entries = Vec::with_capacity((last - first + 1) as usize);
                for seq in first..=last {
                    let item = buffer.get_by_seq_nr(seq).ok_or_else(|| {
                        Error::InternalInconsistency(format!(
                            "missing item {seq} in claimed full range [{first}, {last}] for representation {}",
                            rep.id
                        ))
                    })?;
                    entries.push((item.dts, item.duration));
                }
                if shared_entries.is_none() {
                    shared_entries = Some(entries);
                }
            }

            let segments = compress_timeline(&shared_entries.unwrap_or_default());

            adapt_set.segment_template = SegmentTemplate::Timeline {
                timescale,
                start_number: first,
                init,
                media,
                segments,
            };
        }

        let xml = out_mpd.to_xml_string();
        write_atomic(storage_dir, "manifest_timeline_nr.mpd", &xml)?;

        inner.latest_emitted_seq_nr = last;
        Ok(xml)
    }

    pub fn latest_emitted_seq_nr(&self) -> u32 {
        self.inner.lock().latest_emitted_seq_nr
    }

    pub fn started(&self) -> bool {
        self.inner.lock().started
    }

    /// Patch the duration of the most recently appended item for `track`,
    /// once the following segment's dts makes it computable. A no-op if the
    /// track has no buffer yet (its first segment hasn't arrived).
    pub fn set_latest_duration(&self, track: &str, duration: u32) -> Result<()> {
        match self.inner.lock().buffers.get_mut(track) {
            Some(buffer) => buffer.set_latest_duration(duration),
            None => Ok(()),
        }
    }

    /// Fold over a track's currently buffered items read-only, for deriving
    /// bandwidth/frame-rate estimates in `Channel` without exposing the
    /// buffer itself. Returns `None` if the track has no buffer yet.
    pub fn fold_track_buffer<T>(
        &self,
        track: &str,
        init: T,
        f: impl Fn(T, &RecSegData) -> T,
    ) -> Option<T> {
        let inner = self.inner.lock();
        inner.buffers.get(track).map(|buf| buf.iter().fold(init, f))
    }
}

impl Default for SegmentTimelineGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn write_atomic(dir: &Path, file_name: &str, contents: &str) -> Result<()> {
    let tmp_path = dir.join(format!("{file_name}.tmp"));
    let final_path = dir.join(file_name);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}
