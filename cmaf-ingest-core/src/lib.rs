//! # cmaf-ingest-core
//!
//! Core library for a CMAF live-ingest receiver: turns an inbound stream of
//! arbitrarily chunked fragmented-MP4 bytes into correctly framed on-disk
//! segments, a consistent per-channel DASH manifest, and a bounded, sliding
//! timeshift window.
//!
//! This crate has no networking and no process I/O beyond the filesystem
//! writes `Channel` performs — the HTTP front end, CLI, and configuration
//! loading live in `cmaf-ingest-server`.
//!
//! ## Pipeline
//!
//! 1. [`parser::ChunkParser`] segments a PUT body into init/media chunks
//!    without buffering a whole segment.
//! 2. [`channel::Channel`] ingests those chunks: init segments establish
//!    track data and adaptation sets; media segments flow through cadence
//!    detection into the [`timeline::SegmentTimelineGenerator`], which owns
//!    a [`buffer::SegDataBuffer`] per track and one [`seqcounter::SeqCounter`]
//!    and rewrites the `SegmentTimeline` manifest as sequence numbers become
//!    fully covered.
//! 3. [`mpd`] is the in-memory DASH MPD tree and its XML rendering, shared
//!    by both the fixed-duration and timeline manifests.

pub mod buffer;
pub mod channel;
pub mod error;
pub mod mpd;
pub mod parser;
pub mod seqcounter;
pub mod timeline;
pub mod types;

pub use buffer::{RecSegData, RecSegFlags, SegDataBuffer};
pub use channel::{Channel, IncomingSegment, TrackData};
pub use error::{Error, Result};
pub use parser::{
    find_child, read_emsg_scheme_id_uri, read_moof_fields, styp_has_lmsg_brand, Chunk,
    ChunkParser,
};
pub use seqcounter::SeqCounter;
pub use timeline::SegmentTimelineGenerator;
pub use types::{ChannelConfig, Extension, MediaType, RepresentationConfig, SampleEntry, StreamKey};
