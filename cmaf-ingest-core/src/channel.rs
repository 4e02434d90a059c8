//! Channel (component E): owns one stream's init metadata, derived master
//! cadence, in-memory MPD skeleton, and the single inbound queue through
//! which the receiver hands off completed media segments. The channel's
//! consumer task (spawned by the channel manager) is the only writer of any
//! of this state — the HTTP-handling tasks only call [`Channel::add_init`]
//! (write path for the rare synchronous init case) and
//! [`Channel::submit_segment`], which just pushes onto the bounded queue.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::buffer::{RecSegData, RecSegFlags};
use crate::error::{Error, Result};
use crate::mpd::{AdaptationSet, Mpd, Representation, SegmentTemplate};
use crate::parser::{
    find_child, read_btrt_avg_bitrate, read_hdlr_handler_type, read_kind_scheme_and_value,
    read_mdhd, read_stsd_first_entry, read_visual_sample_entry_dimensions,
    read_audio_sample_entry_sample_rate, rewrite_mdhd_timescale, scan_for_box, walk_boxes_mut,
};
use crate::timeline::SegmentTimelineGenerator;
use crate::types::{ChannelConfig, Extension, MediaType, RepresentationConfig, SampleEntry};

/// Backpressure capacity of the inbound queue (spec §5: "capacity 10
/// `RecSegData` items").
const INBOUND_QUEUE_CAPACITY: usize = 10;

/// Text tracks are the only ones whose timescale/dts this receiver rewrites
/// (spec §1 Non-goals, §4.E).
const TEXT_OUTPUT_TIMESCALE: u32 = 1000;

const SECONDS_PER_DAY: u64 = 86_400;

/// One raw segment observation handed from the receiver to a channel's
/// inbound queue. Unlike [`RecSegData`], this has no `duration` yet — the
/// channel's consumer derives that from the gap to the *next* segment's
/// dts, which is why only the consumer (never the HTTP handler) is allowed
/// to produce a `RecSegData`.
#[derive(Debug, Clone)]
pub struct IncomingSegment {
    pub track_name: String,
    pub raw_seq_nr: u32,
    pub raw_dts: u64,
    pub total_size: u32,
    pub nr_samples: u16,
    pub is_lmsg: bool,
    pub is_slate: bool,
}

/// Normalized per-track metadata, built once from a track's init segment
/// (spec §3 "TrackData").
#[derive(Debug, Clone)]
pub struct TrackData {
    pub name: String,
    pub media_type: MediaType,
    pub extension: Extension,
    pub sample_entry: SampleEntry,
    pub language: Option<String>,
    pub input_timescale: u32,
    pub output_timescale: u32,
    pub role: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub audio_sampling_rate: Option<u32>,
    pub btrt_bitrate: Option<u64>,
    pub ignore: bool,
}

impl TrackData {
    fn adaptation_key(&self) -> (MediaType, &'static str, Option<String>, Option<String>) {
        (
            self.media_type,
            self.sample_entry.codec_prefix(),
            self.language.clone(),
            self.role.clone(),
        )
    }
}

/// A finalized segment awaiting the next arrival to learn its duration.
#[derive(Debug, Clone)]
struct PendingSeg {
    seq_nr: u32,
    dts: u64,
    total_size: u32,
    nr_samples: u16,
    is_lmsg: bool,
    is_slate: bool,
}

/// The last finalized master-track segment not yet confirmed as cadence.
#[derive(Debug, Clone, Copy)]
struct CadenceCandidate {
    seq_nr: u32,
    dts: u64,
    duration: u32,
    total_size: u32,
    nr_samples: u16,
}

struct Inner {
    track_order: Vec<String>,
    track_datas: HashMap<String, TrackData>,
    adaptation_set_index: HashMap<(MediaType, &'static str, Option<String>, Option<String>), usize>,

    master_track_name: Option<String>,
    master_timescale: u32,
    master_segment_duration: u32,
    master_seq_nr_shift: i64,
    master_time_shift: i64,
    start_time_seconds: u64,

    cadence_candidate: Option<CadenceCandidate>,
    pending: HashMap<String, PendingSeg>,
    bandwidth_acc: HashMap<String, (u64, u64)>,

    mpd: Mpd,
    max_buf_segments: u32,
}

/// Persistent per-channel aggregate (spec §3 "Channel").
pub struct Channel {
    pub name: String,
    pub dir: PathBuf,
    pub config: ChannelConfig,
    inner: RwLock<Inner>,
    timeline: SegmentTimelineGenerator,
    inbound_tx: mpsc::Sender<IncomingSegment>,
    ignoring: AtomicBool,
}

impl Channel {
    /// Create a channel rooted at `dir`, returning it alongside the receiver
    /// end of its inbound queue — the caller (channel manager) is
    /// responsible for spawning [`Channel::run_consumer`] on that receiver.
    pub fn new(dir: PathBuf, config: ChannelConfig) -> (Arc<Self>, mpsc::Receiver<IncomingSegment>) {
        let (tx, rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let ignore = config.ignore;
        let channel = Channel {
            name: config.name.clone(),
            dir,
            config,
            inner: RwLock::new(Inner {
                track_order: Vec::new(),
                track_datas: HashMap::new(),
                adaptation_set_index: HashMap::new(),
                master_track_name: None,
                master_timescale: 0,
                master_segment_duration: 0,
                master_seq_nr_shift: 0,
                master_time_shift: 0,
                start_time_seconds: 0,
                cadence_candidate: None,
                pending: HashMap::new(),
                bandwidth_acc: HashMap::new(),
                mpd: Mpd::empty(60),
                max_buf_segments: 0,
            }),
            timeline: SegmentTimelineGenerator::new(),
            inbound_tx: tx,
            ignoring: AtomicBool::new(ignore),
        };
        (Arc::new(channel), rx)
    }

    pub fn is_ignored(&self) -> bool {
        self.ignoring.load(Ordering::Relaxed)
    }

    pub fn inbound_sender(&self) -> mpsc::Sender<IncomingSegment> {
        self.inbound_tx.clone()
    }

    /// Current fixed-duration or timeline MPD rendered to XML, if any
    /// adaptation sets have been established yet.
    pub fn mpd_xml(&self) -> String {
        self.inner.read().mpd.to_xml_string()
    }

    pub fn track_names(&self) -> Vec<String> {
        self.inner.read().track_order.clone()
    }

    pub fn latest_emitted_seq_nr(&self) -> u32 {
        self.timeline.latest_emitted_seq_nr()
    }

    /// Apply the channel's current `(startNr, masterSeqNrShift)` to a raw
    /// `mfhd.sequenceNumber`, the same formula `write_and_submit` uses
    /// internally. The receiver calls this to name `<normalizedSeqNr>.<ext>`
    /// before the bytes are even queued to the consumer (spec §4.G point 6).
    pub fn normalize_seq_nr(&self, raw_seq_nr: u32) -> u32 {
        let inner = self.inner.read();
        (raw_seq_nr as i64 - self.config.start_nr as i64 + inner.master_seq_nr_shift).max(0) as u32
    }

    /// Number of segments currently queued for this channel's sequence
    /// counter window, for the `/debug/channels` introspection endpoint.
    pub fn max_buf_segments(&self) -> u32 {
        self.inner.read().max_buf_segments
    }

    /// Drive the channel's consumer loop: serially drains the inbound queue
    /// and is the sole writer of every piece of channel-mutable state (spec
    /// §5). Returns when the queue is closed (channel manager shutdown).
    pub async fn run_consumer(self: Arc<Self>, mut rx: mpsc::Receiver<IncomingSegment>) {
        while let Some(seg) = rx.recv().await {
            if self.is_ignored() {
                continue;
            }
            if let Err(err) = self.received_seg_data(seg) {
                match &err {
                    Error::ProtocolSemantic(msg) => {
                        warn!(channel = %self.name, "segment dropped: {msg}")
                    }
                    Error::InternalInconsistency(msg) => {
                        error!(channel = %self.name, "timeline invariant violated: {msg}")
                    }
                    Error::StorageIo(io) => {
                        error!(channel = %self.name, "storage error: {io}")
                    }
                    other => error!(channel = %self.name, "{other}"),
                }
            }
        }
        debug!(channel = %self.name, "consumer loop exiting: inbound queue closed");
    }

    // ---------------------------------------------------------------- init

    /// Ingest one track's init segment (`ftyp`+`moov`), writing
    /// `init_org.<ext>` on first receipt and a normalized `init.<ext>` (text
    /// tracks get their `mdhd.timescale` rewritten to 1000). Builds or
    /// extends the adaptation-set structure of the in-memory MPD.
    pub fn add_init(&self, track_name: &str, extension: Extension, raw_init: Vec<u8>) -> Result<()> {
        let track_dir = self.dir.join(track_name);
        fs::create_dir_all(&track_dir)?;

        let init_org_path = track_dir.join(format!("init_org.{}", extension.as_str()));
        if !init_org_path.exists() {
            fs::write(&init_org_path, &raw_init)?;
        }

        let media_type = extension.media_type();
        let rep_cfg = self.rep_config_for(track_name);

        let moov = find_child(&raw_init, b"moov").ok_or(Error::MalformedBox("moov"))?;
        let trak = find_child(moov, b"trak").ok_or(Error::MalformedBox("trak"))?;
        let mdia = find_child(trak, b"mdia").ok_or(Error::MalformedBox("mdia"))?;
        let mdhd_payload = find_child(mdia, b"mdhd").ok_or(Error::MalformedBox("mdhd"))?;
        let mdhd = read_mdhd(mdhd_payload)?;

        let minf = find_child(mdia, b"minf").ok_or(Error::MalformedBox("minf"))?;
        let stbl = find_child(minf, b"stbl").ok_or(Error::MalformedBox("stbl"))?;
        let stsd = find_child(stbl, b"stsd").ok_or(Error::MalformedBox("stsd"))?;
        let sample_entry_tag = read_stsd_first_entry(stsd).ok_or(Error::MalformedBox("stsd"))?;
        let sample_entry = SampleEntry::from_fourcc(&sample_entry_tag);
        let entry_payload = stsd_first_entry_payload(stsd);

        let (width, height) = match (media_type, entry_payload) {
            (MediaType::Video, Some(p)) => match read_visual_sample_entry_dimensions(p) {
                Some((w, h)) => (Some(w as u32), Some(h as u32)),
                None => (None, None),
            },
            _ => (None, None),
        };
        let audio_sampling_rate = match (media_type, entry_payload) {
            (MediaType::Audio, Some(p)) => read_audio_sample_entry_sample_rate(p),
            _ => None,
        };
        let btrt_bitrate = entry_payload
            .and_then(|p| scan_for_box(p, b"btrt"))
            .and_then(read_btrt_avg_bitrate);

        let role = rep_cfg
            .as_ref()
            .and_then(|c| c.role.clone())
            .or_else(|| find_child(trak, b"udta").and_then(|udta| find_child(udta, b"kind")).and_then(|kind| {
                read_kind_scheme_and_value(kind).and_then(|(scheme, value)| {
                    if scheme == "urn:mpeg:dash:role:2011" {
                        Some(value)
                    } else {
                        None
                    }
                })
            }));

        let language = rep_cfg
            .as_ref()
            .and_then(|c| c.language.clone())
            .or_else(|| mdhd.language.and_then(|l| std::str::from_utf8(&l).ok().map(str::to_string)));

        let _ = read_hdlr_handler_type(find_child(mdia, b"hdlr").unwrap_or(&[]));

        let output_timescale = if media_type == MediaType::Text {
            TEXT_OUTPUT_TIMESCALE
        } else {
            mdhd.timescale
        };

        let track = TrackData {
            name: track_name.to_string(),
            media_type,
            extension,
            sample_entry,
            language,
            input_timescale: mdhd.timescale,
            output_timescale,
            role,
            width,
            height,
            audio_sampling_rate,
            btrt_bitrate,
            ignore: rep_cfg.as_ref().map(|c| c.ignore).unwrap_or(false),
        };

        let mut normalized = raw_init;
        if media_type == MediaType::Text {
            walk_boxes_mut(&mut normalized, &[b"moov", b"trak", b"mdia"], &mut |btype, payload| {
                if btype == b"mdhd" {
                    let _ = rewrite_mdhd_timescale(payload, TEXT_OUTPUT_TIMESCALE);
                }
            });
        }
        fs::write(track_dir.join(format!("init.{}", extension.as_str())), &normalized)?;

        let mut inner = self.inner.write();

        if !inner.track_datas.contains_key(track_name) {
            inner.track_order.push(track_name.to_string());
            if inner.master_track_name.is_none() && media_type == MediaType::Video {
                inner.master_track_name = Some(track_name.to_string());
            }
            if inner.start_time_seconds == 0 {
                if let Ok(creation_time) = crate::parser::read_mvhd_creation_time(
                    find_child(moov, b"mvhd").unwrap_or(&[]),
                ) {
                    if creation_time > 0 && creation_time % SECONDS_PER_DAY == 0 {
                        inner.start_time_seconds = creation_time;
                    }
                }
            }
        }
        inner.track_datas.insert(track_name.to_string(), track.clone());

        if !track.ignore {
            self.upsert_adaptation_set(&mut inner, &track, rep_cfg.as_ref())?;
        }

        let xml = inner.mpd.to_xml_string();
        drop(inner);
        write_atomic(&self.dir, "manifest.mpd", &xml)?;
        Ok(())
    }

    fn rep_config_for(&self, track_name: &str) -> Option<RepresentationConfig> {
        self.config.reps.iter().find(|r| r.name == track_name).cloned()
    }

    fn upsert_adaptation_set(
        &self,
        inner: &mut Inner,
        track: &TrackData,
        rep_cfg: Option<&RepresentationConfig>,
    ) -> Result<()> {
        let key = track.adaptation_key();
        let rep = Representation {
            id: track.name.clone(),
            bandwidth: rep_cfg
                .and_then(|c| c.bitrate)
                .or(track.btrt_bitrate)
                .unwrap_or(0),
            codecs: track.sample_entry.codec_prefix().to_string(),
            width: track.width,
            height: track.height,
            frame_rate: None,
            audio_sampling_rate: track.audio_sampling_rate,
            label: rep_cfg.and_then(|c| c.display_name.clone()),
        };

        if let Some(&idx) = inner.adaptation_set_index.get(&key) {
            let adapt_set = &mut inner.mpd.adaptation_sets[idx];
            let (existing_timescale, _, _) = adapt_set.segment_template.timescale_init_media();
            if existing_timescale != track.output_timescale {
                return Err(Error::ProtocolSemantic(format!(
                    "track {} timescale {} does not match adaptation set timescale {}",
                    track.name, track.output_timescale, existing_timescale
                )));
            }
            if let Some(existing) = adapt_set.representations.iter_mut().find(|r| r.id == rep.id) {
                *existing = rep;
            } else {
                adapt_set.representations.push(rep);
            }
            return Ok(());
        }

        let id = inner.mpd.adaptation_sets.len() as u32;
        let ext = track.extension.as_str();
        let segment_template = SegmentTemplate::FixedDuration {
            duration: 0,
            timescale: track.output_timescale,
            start_number: self.config.start_nr,
            init: format!("$RepresentationID$/init.{ext}"),
            media: format!("$RepresentationID$/$Number$.{ext}"),
        };
        inner.mpd.adaptation_sets.push(AdaptationSet {
            id,
            media_type: track.media_type,
            language: track.language.clone(),
            role: track.role.clone(),
            segment_template,
            representations: vec![rep],
        });
        inner.adaptation_set_index.insert(key, id as usize);
        Ok(())
    }

    // ------------------------------------------------------------ ingest

    /// Push one raw segment observation onto the inbound queue. Backpressure
    /// (queue full) is applied by `await`ing the bounded `mpsc` send — the
    /// caller (an HTTP handler) blocks, never the consumer.
    pub async fn submit_segment(&self, seg: IncomingSegment) -> Result<()> {
        self.inbound_tx
            .send(seg)
            .await
            .map_err(|_| Error::InternalInconsistency("channel consumer has shut down".into()))
    }

    /// The only writer of channel-mutable state (spec §4.E/§5). Computes the
    /// just-finalized predecessor's duration, detects cadence, writes the
    /// media file, and feeds the timeline generator.
    fn received_seg_data(&self, seg: IncomingSegment) -> Result<()> {
        let track_name = seg.track_name.clone();
        let output_timescale = {
            let inner = self.inner.read();
            match inner.track_datas.get(&track_name) {
                Some(t) => t.output_timescale,
                None => {
                    return Err(Error::ProtocolSemantic(format!(
                        "media segment for unknown track {track_name} (no init received yet)"
                    )))
                }
            }
        };
        let input_timescale = {
            let inner = self.inner.read();
            inner.track_datas.get(&track_name).unwrap().input_timescale
        };

        let output_dts = if output_timescale != input_timescale && input_timescale > 0 {
            seg.raw_dts
                .saturating_mul(output_timescale as u64)
                / input_timescale as u64
        } else {
            seg.raw_dts
        };

        let mut inner = self.inner.write();
        let finalize = inner.pending.remove(&track_name).map(|prev| {
            let duration = output_dts.saturating_sub(prev.dts).min(u32::MAX as u64) as u32;
            (prev, duration)
        });

        inner.pending.insert(
            track_name.clone(),
            PendingSeg {
                seq_nr: seg.raw_seq_nr,
                dts: output_dts,
                total_size: seg.total_size,
                nr_samples: seg.nr_samples,
                is_lmsg: seg.is_lmsg,
                is_slate: seg.is_slate,
            },
        );

        let Some((prev, duration)) = finalize else {
            return Ok(());
        };

        let is_master = inner.master_track_name.as_deref() == Some(track_name.as_str());
        let shifted_already = inner.master_segment_duration != 0;

        if is_master && !shifted_already {
            self.advance_cadence_detection(
                &mut inner,
                &track_name,
                prev.seq_nr,
                prev.dts,
                duration,
                prev.total_size,
                prev.nr_samples,
            )?;
            return Ok(());
        }

        if !shifted_already {
            // Non-master tracks wait for cadence before anything is durable.
            return Ok(());
        }

        self.finalize_and_submit(&mut inner, &track_name, prev, duration)
    }

    fn advance_cadence_detection(
        &self,
        inner: &mut Inner,
        master_track: &str,
        seq_nr: u32,
        dts: u64,
        duration: u32,
        total_size: u32,
        nr_samples: u16,
    ) -> Result<()> {
        let candidate = CadenceCandidate {
            seq_nr,
            dts,
            duration,
            total_size,
            nr_samples,
        };

        let confirmed = match inner.cadence_candidate {
            Some(prev) if prev.seq_nr + 1 == seq_nr && prev.duration == duration => Some(prev),
            _ => None,
        };

        let Some(prev) = confirmed else {
            inner.cadence_candidate = Some(candidate);
            return Ok(());
        };

        let master_timescale = {
            let Some(track) = inner.track_datas.get(master_track) else {
                return Err(Error::InternalInconsistency("master track vanished".into()));
            };
            track.output_timescale
        };

        inner.master_timescale = master_timescale;
        inner.master_segment_duration = duration;

        let expected_seq_nr0 = (prev.dts / duration as u64) as u32;
        let overshoot = (prev.dts % duration as u64) as u32;
        let is_shifted = expected_seq_nr0 != prev.seq_nr || overshoot != 0;
        if is_shifted {
            let mut shift = expected_seq_nr0 as i64 - prev.seq_nr as i64;
            if overshoot > 0 {
                shift += 1;
            }
            inner.master_seq_nr_shift = shift;
            inner.master_time_shift = duration as i64 - overshoot as i64;
        } else {
            inner.master_seq_nr_shift = 0;
            inner.master_time_shift = 0;
        }

        let depth_secs = self.config.time_shift_buffer_depth_s.max(1);
        inner.max_buf_segments =
            div_ceil(depth_secs as u64 * master_timescale as u64, duration as u64) as u32 + 2;

        self.timeline.start(inner.max_buf_segments, is_shifted)?;

        // Both segments that established cadence are the first to count as
        // normalized going forward.
        let first = RecSegData {
            track_name: master_track.to_string(),
            dts: prev.dts,
            seq_nr: prev.seq_nr,
            duration,
            total_size: prev.total_size,
            nr_samples: prev.nr_samples,
            flags: RecSegFlags {
                is_shifted: true,
                is_complete: true,
                ..RecSegFlags::default()
            },
        };
        self.write_and_submit(inner, master_track, first)?;

        let second = RecSegData {
            track_name: master_track.to_string(),
            dts,
            seq_nr,
            duration,
            total_size,
            nr_samples,
            flags: RecSegFlags {
                is_shifted: true,
                is_complete: true,
                ..RecSegFlags::default()
            },
        };
        self.write_and_submit(inner, master_track, second)?;

        let xml = self.build_manifest_xml(inner);
        write_atomic(&self.dir, "manifest.mpd", &xml)?;
        Ok(())
    }

    fn finalize_and_submit(
        &self,
        inner: &mut Inner,
        track_name: &str,
        prev: PendingSeg,
        duration: u32,
    ) -> Result<()> {
        let rec = RecSegData {
            track_name: track_name.to_string(),
            dts: prev.dts,
            seq_nr: prev.seq_nr,
            duration,
            total_size: prev.total_size,
            nr_samples: prev.nr_samples,
            flags: RecSegFlags {
                is_lmsg: prev.is_lmsg,
                is_slate: prev.is_slate,
                is_missing: false,
                is_complete: true,
                is_shifted: true,
            },
        };
        self.write_and_submit(inner, track_name, rec)
    }

    fn write_and_submit(&self, inner: &mut Inner, track_name: &str, rec: RecSegData) -> Result<()> {
        let track = inner
            .track_datas
            .get(track_name)
            .ok_or_else(|| Error::ProtocolSemantic(format!("unknown track {track_name}")))?
            .clone();

        if track.ignore {
            return Ok(());
        }

        let normalized_seq_nr = (rec.seq_nr as i64 - self.config.start_nr as i64
            + inner.master_seq_nr_shift)
            .max(0) as u32;

        let track_dir = self.dir.join(track_name);
        fs::create_dir_all(&track_dir)?;
        let seg_path = track_dir.join(format!("{normalized_seq_nr}.{}", track.extension.as_str()));
        // The actual media bytes are written by the receiver as they stream
        // in; the channel only (re)confirms bookkeeping here if the file is
        // somehow missing (e.g. a crash-recovered consumer catching up).
        if !seg_path.exists() {
            debug!(channel = %self.name, track = %track_name, seq_nr = normalized_seq_nr, "segment file not yet present at bookkeeping time");
        }

        if rec.total_size > 0 {
            let entry = inner.bandwidth_acc.entry(track_name.to_string()).or_insert((0, 0));
            entry.0 += rec.total_size as u64;
            entry.1 += rec.duration as u64;
        }

        let new_full = self.timeline.add_segment_data(rec)?;

        if let Some(max_buf) = Some(inner.max_buf_segments).filter(|&n| n > 0) {
            let evict_seq = normalized_seq_nr.saturating_sub(max_buf);
            if evict_seq > 0 {
                let evict_path = track_dir.join(format!("{evict_seq}.{}", track.extension.as_str()));
                if evict_path.exists() {
                    let _ = fs::remove_file(&evict_path);
                }
            }
        }

        if new_full > 0 {
            match self
                .timeline
                .generate_segment_timeline_mpd(new_full, &inner.mpd, &self.dir)
            {
                Ok(_) => {}
                Err(Error::InternalInconsistency(msg)) => {
                    error!(channel = %self.name, "timeline MPD write suppressed: {msg}");
                }
                Err(other) => return Err(other),
            }
        }

        Ok(())
    }

    fn build_manifest_xml(&self, inner: &mut Inner) -> String {
        for adapt_set in &mut inner.mpd.adaptation_sets {
            let timescale = adapt_set.segment_template.timescale_init_media().0;
            if let SegmentTemplate::FixedDuration { duration, .. } = &mut adapt_set.segment_template {
                if *duration == 0 {
                    *duration = inner.master_segment_duration.max(1);
                }
            }
            for rep in &mut adapt_set.representations {
                if rep.bandwidth == 0 {
                    if let Some(&(size, dur)) = inner.bandwidth_acc.get(&rep.id) {
                        if dur > 0 {
                            rep.bandwidth = size.saturating_mul(8).saturating_mul(timescale as u64) / dur;
                        }
                    }
                }
                if adapt_set.media_type == MediaType::Video && rep.frame_rate.is_none() {
                    if let Some(sample) = self.timeline.fold_track_buffer(&rep.id, None, |acc, item| {
                        acc.or(Some((item.nr_samples, item.duration)))
                    }) {
                        if let Some((nr_samples, duration)) = sample {
                            if nr_samples > 0 && duration > 0 {
                                let num = nr_samples as u32 * timescale;
                                let den = duration;
                                let g = gcd(num, den).max(1);
                                rep.frame_rate = Some((num / g, den / g));
                            }
                        }
                    }
                }
            }
        }
        inner.mpd.to_xml_string()
    }
}

fn stsd_first_entry_payload(stsd_payload: &[u8]) -> Option<&[u8]> {
    if stsd_payload.len() < 16 {
        return None;
    }
    let size = u32::from_be_bytes(stsd_payload[8..12].try_into().ok()?) as usize;
    if size < 8 || 8 + size > stsd_payload.len() {
        return None;
    }
    Some(&stsd_payload[16..8 + size])
}

fn div_ceil(num: u64, den: u64) -> u64 {
    if den == 0 {
        0
    } else {
        (num + den - 1) / den
    }
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

fn write_atomic(dir: &Path, file_name: &str, contents: &str) -> Result<()> {
    let tmp_path = dir.join(format!("{file_name}.tmp"));
    let final_path = dir.join(file_name);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(btype: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        v.extend_from_slice(btype);
        v.extend_from_slice(payload);
        v
    }

    fn sample_video_init() -> Vec<u8> {
        let mut mdhd_payload = vec![0u8; 4];
        mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // creation_time
        mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // modification_time
        mdhd_payload.extend_from_slice(&90000u32.to_be_bytes()); // timescale
        mdhd_payload.extend_from_slice(&0u32.to_be_bytes()); // duration
        mdhd_payload.extend_from_slice(&[0, 0]); // language
        mdhd_payload.extend_from_slice(&[0, 0]); // pre_defined
        let mdhd = make_box(b"mdhd", &mdhd_payload);

        let mut avc1_payload = vec![0u8; 24];
        avc1_payload.extend_from_slice(&1920u16.to_be_bytes());
        avc1_payload.extend_from_slice(&1080u16.to_be_bytes());
        let avc1 = make_box(b"avc1", &avc1_payload);

        let mut stsd_payload = vec![0u8; 4];
        stsd_payload.extend_from_slice(&1u32.to_be_bytes());
        stsd_payload.extend_from_slice(&avc1);
        let stsd = make_box(b"stsd", &stsd_payload);
        let stbl = make_box(b"stbl", &stsd);
        let minf = make_box(b"minf", &stbl);

        let mut mdia_payload = Vec::new();
        mdia_payload.extend_from_slice(&mdhd);
        mdia_payload.extend_from_slice(&minf);
        let mdia = make_box(b"mdia", &mdia_payload);
        let trak = make_box(b"trak", &mdia);

        let mut mvhd_payload = vec![0u8; 4];
        mvhd_payload.extend_from_slice(&0u32.to_be_bytes());
        let mvhd = make_box(b"mvhd", &mvhd_payload);

        let mut moov_payload = Vec::new();
        moov_payload.extend_from_slice(&mvhd);
        moov_payload.extend_from_slice(&trak);
        let moov = make_box(b"moov", &moov_payload);

        let ftyp = make_box(b"ftyp", b"isom");
        let mut body = Vec::new();
        body.extend_from_slice(&ftyp);
        body.extend_from_slice(&moov);
        body
    }

    #[test]
    fn add_init_builds_adaptation_set_and_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::default_for("test");
        let (channel, _rx) = Channel::new(dir.path().to_path_buf(), config);

        channel
            .add_init("video", Extension::Cmfv, sample_video_init())
            .unwrap();

        assert!(dir.path().join("manifest.mpd").exists());
        assert!(dir.path().join("video/init.cmfv").exists());
        assert!(dir.path().join("video/init_org.cmfv").exists());
        let xml = channel.mpd_xml();
        assert!(xml.contains("avc1"));
    }

    #[test]
    fn cadence_detection_confirms_on_matching_consecutive_durations() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::default_for("test");
        let (channel, _rx) = Channel::new(dir.path().to_path_buf(), config);
        channel
            .add_init("video", Extension::Cmfv, sample_video_init())
            .unwrap();

        // Three arrivals -> two finalized durations, both 5000: cadence confirmed.
        channel
            .received_seg_data(IncomingSegment {
                track_name: "video".into(),
                raw_seq_nr: 101,
                raw_dts: 0,
                total_size: 1000,
                nr_samples: 25,
                is_lmsg: false,
                is_slate: false,
            })
            .unwrap();
        channel
            .received_seg_data(IncomingSegment {
                track_name: "video".into(),
                raw_seq_nr: 102,
                raw_dts: 5000,
                total_size: 1000,
                nr_samples: 25,
                is_lmsg: false,
                is_slate: false,
            })
            .unwrap();
        channel
            .received_seg_data(IncomingSegment {
                track_name: "video".into(),
                raw_seq_nr: 103,
                raw_dts: 10000,
                total_size: 1000,
                nr_samples: 25,
                is_lmsg: false,
                is_slate: false,
            })
            .unwrap();

        assert_eq!(channel.inner.read().master_segment_duration, 5000);
    }

    /// §8 scenario 5 durations `[5000, 4500, 5000]`: the §4.E algorithm this
    /// module implements confirms cadence on the first *pair* of consecutive
    /// (seqNr+1) items with equal duration, resetting the candidate to the
    /// newer item on every mismatch. Tracing `[5000, 4500, 5000]` through
    /// that rule never produces a matching pair (5000 vs 4500 mismatches,
    /// then the reset candidate 4500 vs 5000 mismatches again) — it takes a
    /// fourth duration repeating 5000 for two consecutive items to confirm.
    /// This diverges from spec.md's own prose ("after the third (5000
    /// matching), duration 5000 is adopted"), which does not reproduce under
    /// its own stated pairwise rule; see DESIGN.md's "Open Question
    /// decisions" for why the literal §4.E algorithm was kept over the
    /// prose's claimed outcome.
    #[test]
    fn cadence_detection_drops_candidate_on_mismatch_scenario_5() {
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::default_for("test");
        let (channel, _rx) = Channel::new(dir.path().to_path_buf(), config);
        channel
            .add_init("video", Extension::Cmfv, sample_video_init())
            .unwrap();

        let arrivals = [
            (101, 0u64),
            (102, 5000),  // finalizes seq 101: duration 5000
            (103, 9500),  // finalizes seq 102: duration 4500 -> mismatch, candidate reset
            (104, 14500), // finalizes seq 103: duration 5000 -> still mismatches 4500, candidate reset
        ];
        for (raw_seq_nr, raw_dts) in arrivals {
            channel
                .received_seg_data(IncomingSegment {
                    track_name: "video".into(),
                    raw_seq_nr,
                    raw_dts,
                    total_size: 1000,
                    nr_samples: 25,
                    is_lmsg: false,
                    is_slate: false,
                })
                .unwrap();
        }
        // Three finalized durations in, spec.md's prose claims cadence is
        // already confirmed; the implemented pairwise algorithm has not
        // found a matching consecutive pair yet.
        assert_eq!(channel.inner.read().master_segment_duration, 0);

        // A fourth arrival finalizes seq 104 at duration 5000, matching the
        // candidate left over from seq 103 (also 5000): *now* it confirms.
        channel
            .received_seg_data(IncomingSegment {
                track_name: "video".into(),
                raw_seq_nr: 105,
                raw_dts: 19500,
                total_size: 1000,
                nr_samples: 25,
                is_lmsg: false,
                is_slate: false,
            })
            .unwrap();
        assert_eq!(channel.inner.read().master_segment_duration, 5000);
    }

    #[test]
    fn text_track_output_timescale_forced_to_1000() {
        let mut body = sample_video_init();
        // Flip the handler-relevant pieces are irrelevant here; only the
        // mdhd timescale + extension matter for this assertion.
        let dir = tempfile::tempdir().unwrap();
        let config = ChannelConfig::default_for("test");
        let (channel, _rx) = Channel::new(dir.path().to_path_buf(), config);
        // reuse the same structurally-valid moov for a text track
        channel.add_init("subs", Extension::Cmft, body.split_off(0)).unwrap();

        let inner = channel.inner.read();
        let track = inner.track_datas.get("subs").unwrap();
        assert_eq!(track.output_timescale, 1000);
    }
}
