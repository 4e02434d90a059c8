//! In-memory DASH MPD tree and its XML rendering.
//!
//! No XML crate: the tree is small and fixed-shape, so — mirroring how the
//! teacher builds its M3U8 playlists — this writes the markup directly with
//! `write!` into a `String` rather than pulling in a DOM/serializer crate.

use std::fmt::Write as _;

use crate::types::MediaType;

/// One `<S>` element (or compressed run of them) inside a `SegmentTimeline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTimelineEntry {
    /// Present only on the very first entry of the whole timeline.
    pub t: Option<u64>,
    pub d: u32,
    /// Repeat count: 0 means "just this once", matching `@r` semantics.
    pub r: u32,
}

/// Collapse an ordered sequence of `(dts, duration)` pairs into `<S>`
/// elements, merging consecutive equal durations into one entry with `@r`.
/// `t` is attached only to the first element, as `dts` of the first pair.
pub fn compress_timeline(entries: &[(u64, u32)]) -> Vec<SegmentTimelineEntry> {
    let mut out: Vec<SegmentTimelineEntry> = Vec::new();
    for (i, &(dts, duration)) in entries.iter().enumerate() {
        let t = if i == 0 { Some(dts) } else { None };
        match out.last_mut() {
            Some(last) if last.d == duration => {
                last.r += 1;
            }
            _ => out.push(SegmentTimelineEntry { t, d: duration, r: 0 }),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub enum SegmentTemplate {
    /// `manifest.mpd`: fixed `@duration`, no `SegmentTimeline`.
    FixedDuration {
        duration: u32,
        timescale: u32,
        start_number: u32,
        init: String,
        media: String,
    },
    /// `manifest_timeline_nr.mpd`: `@duration` cleared, `SegmentTimeline`
    /// with `$Number$` substitution carries the actual durations.
    Timeline {
        timescale: u32,
        start_number: u32,
        init: String,
        media: String,
        segments: Vec<SegmentTimelineEntry>,
    },
}

impl SegmentTemplate {
    /// `(timescale, initialization, media)` — present in both variants, used
    /// by the timeline generator to carry the channel's naming scheme over
    /// into a regenerated `SegmentTimeline` template.
    pub(crate) fn timescale_init_media(&self) -> (u32, &str, &str) {
        match self {
            SegmentTemplate::FixedDuration {
                timescale,
                init,
                media,
                ..
            } => (*timescale, init, media),
            SegmentTemplate::Timeline {
                timescale,
                init,
                media,
                ..
            } => (*timescale, init, media),
        }
    }

    fn write_xml(&self, out: &mut String, indent: &str) {
        match self {
            SegmentTemplate::FixedDuration {
                duration,
                timescale,
                start_number,
                init,
                media,
            } => {
                let _ = writeln!(
                    out,
                    r#"{indent}<SegmentTemplate timescale="{timescale}" duration="{duration}" startNumber="{start_number}" initialization="{init}" media="{media}"/>"#
                );
            }
            SegmentTemplate::Timeline {
                timescale,
                start_number,
                init,
                media,
                segments,
            } => {
                let _ = writeln!(
                    out,
                    r#"{indent}<SegmentTemplate timescale="{timescale}" startNumber="{start_number}" initialization="{init}" media="{media}">"#
                );
                let _ = writeln!(out, "{indent}  <SegmentTimeline>");
                for seg in segments {
                    match seg.t {
                        Some(t) if seg.r > 0 => {
                            let _ = writeln!(out, r#"{indent}    <S t="{t}" d="{}" r="{}"/>"#, seg.d, seg.r);
                        }
                        Some(t) => {
                            let _ = writeln!(out, r#"{indent}    <S t="{t}" d="{}"/>"#, seg.d);
                        }
                        None if seg.r > 0 => {
                            let _ = writeln!(out, r#"{indent}    <S d="{}" r="{}"/>"#, seg.d, seg.r);
                        }
                        None => {
                            let _ = writeln!(out, r#"{indent}    <S d="{}"/>"#, seg.d);
                        }
                    }
                }
                let _ = writeln!(out, "{indent}  </SegmentTimeline>");
                let _ = writeln!(out, "{indent}</SegmentTemplate>");
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub id: String,
    pub bandwidth: u64,
    pub codecs: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// `(numerator, denominator)`, already reduced by GCD.
    pub frame_rate: Option<(u32, u32)>,
    pub audio_sampling_rate: Option<u32>,
    pub label: Option<String>,
}

impl Representation {
    fn write_xml(&self, out: &mut String, indent: &str) {
        let _ = write!(
            out,
            r#"{indent}<Representation id="{}" bandwidth="{}" codecs="{}""#,
            self.id, self.bandwidth, self.codecs
        );
        if let Some(w) = self.width {
            let _ = write!(out, r#" width="{w}""#);
        }
        if let Some(h) = self.height {
            let _ = write!(out, r#" height="{h}""#);
        }
        if let Some((num, den)) = self.frame_rate {
            if den == 1 {
                let _ = write!(out, r#" frameRate="{num}""#);
            } else {
                let _ = write!(out, r#" frameRate="{num}/{den}""#);
            }
        }
        if let Some(rate) = self.audio_sampling_rate {
            let _ = write!(out, r#" audioSamplingRate="{rate}""#);
        }
        if self.label.is_none() {
            let _ = writeln!(out, "/>");
            return;
        }
        let _ = writeln!(out, ">");
        if let Some(label) = &self.label {
            let _ = writeln!(out, "{indent}  <Label>{}</Label>", escape_xml(label));
        }
        let _ = writeln!(out, "{indent}</Representation>");
    }
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub id: u32,
    pub media_type: MediaType,
    pub language: Option<String>,
    pub role: Option<String>,
    pub segment_template: SegmentTemplate,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    fn content_type(&self) -> &'static str {
        match self.media_type {
            MediaType::Video => "video",
            MediaType::Audio => "audio",
            MediaType::Text => "text",
            MediaType::Metadata => "application",
        }
    }

    fn write_xml(&self, out: &mut String, indent: &str) {
        let _ = write!(
            out,
            r#"{indent}<AdaptationSet id="{}" contentType="{}" segmentAlignment="true""#,
            self.id,
            self.content_type()
        );
        if let Some(lang) = &self.language {
            let _ = write!(out, r#" lang="{lang}""#);
        }
        let _ = writeln!(out, ">");
        if let Some(role) = &self.role {
            let _ = writeln!(
                out,
                r#"{indent}  <Role schemeIdUri="urn:mpeg:dash:role:2011" value="{role}"/>"#
            );
        }
        self.segment_template.write_xml(out, &format!("{indent}  "));
        for rep in &self.representations {
            rep.write_xml(out, &format!("{indent}  "));
        }
        let _ = writeln!(out, "{indent}</AdaptationSet>");
    }
}

#[derive(Debug, Clone)]
pub struct Mpd {
    pub min_buffer_time: String,
    pub time_shift_buffer_depth: String,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Mpd {
    pub fn empty(time_shift_buffer_depth_secs: u32) -> Self {
        Mpd {
            min_buffer_time: "PT2S".to_string(),
            time_shift_buffer_depth: format!("PT{time_shift_buffer_depth_secs}S"),
            adaptation_sets: Vec::new(),
        }
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        let _ = writeln!(
            out,
            r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-live:2011" type="dynamic" minBufferTime="{}" timeShiftBufferDepth="{}">"#,
            self.min_buffer_time, self.time_shift_buffer_depth
        );
        let _ = writeln!(out, "  <Period id=\"0\" start=\"PT0S\">");
        for adapt_set in &self.adaptation_sets {
            adapt_set.write_xml(&mut out, "    ");
        }
        let _ = writeln!(out, "  </Period>");
        let _ = writeln!(out, "</MPD>");
        out
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compress_merges_equal_runs_and_tags_first_t() {
        let entries = vec![(1000u64, 5000u32), (6000, 5000), (11000, 5000), (16000, 4000)];
        let compressed = compress_timeline(&entries);
        assert_eq!(
            compressed,
            vec![
                SegmentTimelineEntry { t: Some(1000), d: 5000, r: 2 },
                SegmentTimelineEntry { t: None, d: 4000, r: 0 },
            ]
        );
    }

    #[test]
    fn fixed_duration_template_renders_expected_attributes() {
        let mpd = Mpd {
            min_buffer_time: "PT2S".into(),
            time_shift_buffer_depth: "PT60S".into(),
            adaptation_sets: vec![AdaptationSet {
                id: 0,
                media_type: MediaType::Video,
                language: None,
                role: None,
                segment_template: SegmentTemplate::FixedDuration {
                    duration: 5000,
                    timescale: 90000,
                    start_number: 101,
                    init: "init.cmfv".into(),
                    media: "$Number$.cmfv".into(),
                },
                representations: vec![Representation {
                    id: "video".into(),
                    bandwidth: 2_500_000,
                    codecs: "avc1.640028".into(),
                    width: Some(1920),
                    height: Some(1080),
                    frame_rate: Some((30, 1)),
                    audio_sampling_rate: None,
                    label: None,
                }],
            }],
        };

        let xml = mpd.to_xml_string();
        assert!(xml.contains(r#"duration="5000""#));
        assert!(xml.contains(r#"startNumber="101""#));
        assert!(xml.contains(r#"codecs="avc1.640028""#));
        assert!(!xml.contains("SegmentTimeline"));
    }

    #[test]
    fn timeline_template_omits_duration_and_lists_s_elements() {
        let template = SegmentTemplate::Timeline {
            timescale: 90000,
            start_number: 102,
            init: "init.cmfv".into(),
            media: "$Number$.cmfv".into(),
            segments: compress_timeline(&[(0, 5000), (5000, 5000), (10000, 5000)]),
        };
        let mut out = String::new();
        template.write_xml(&mut out, "");
        assert!(!out.contains(r#"duration="#));
        assert!(out.contains(r#"<S t="0" d="5000" r="2"/>"#));
    }
}
