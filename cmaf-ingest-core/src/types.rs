//! Small shared domain types: the media-type/extension bijection (spec §3)
//! and the sample-entry tag set (spec §9 "Dynamic dispatch").

use serde::{Deserialize, Serialize};

/// The kind of content carried by a track, derived from its upload extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Video,
    Audio,
    Text,
    Metadata,
}

/// The four CMAF file extensions this receiver accepts, in bijection with `MediaType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extension {
    Cmfv,
    Cmfa,
    Cmft,
    Cmfm,
}

impl Extension {
    /// Parse the extension from a filename suffix, e.g. `cmfv` (no leading dot).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "cmfv" => Some(Extension::Cmfv),
            "cmfa" => Some(Extension::Cmfa),
            "cmft" => Some(Extension::Cmft),
            "cmfm" => Some(Extension::Cmfm),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Extension::Cmfv => "cmfv",
            Extension::Cmfa => "cmfa",
            Extension::Cmft => "cmft",
            Extension::Cmfm => "cmfm",
        }
    }

    pub fn media_type(self) -> MediaType {
        match self {
            Extension::Cmfv => MediaType::Video,
            Extension::Cmfa => MediaType::Audio,
            Extension::Cmft => MediaType::Text,
            Extension::Cmfm => MediaType::Metadata,
        }
    }
}

impl MediaType {
    pub fn extension(self) -> Extension {
        match self {
            MediaType::Video => Extension::Cmfv,
            MediaType::Audio => Extension::Cmfa,
            MediaType::Text => Extension::Cmft,
            MediaType::Metadata => Extension::Cmfm,
        }
    }
}

/// Closed set of ISOBMFF sample entry (`stsd` child box) tags this receiver
/// recognizes. `Evte` is carried to disk but excluded from MPD generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEntry {
    Avc1,
    Hvc1,
    Mp4a,
    Ac3,
    Ec3,
    Stpp,
    Wvtt,
    Evte,
    Unknown,
}

impl SampleEntry {
    pub fn from_fourcc(tag: &[u8; 4]) -> Self {
        match tag {
            b"avc1" => SampleEntry::Avc1,
            b"hvc1" => SampleEntry::Hvc1,
            b"mp4a" => SampleEntry::Mp4a,
            b"ac-3" => SampleEntry::Ac3,
            b"ec-3" => SampleEntry::Ec3,
            b"stpp" => SampleEntry::Stpp,
            b"wvtt" => SampleEntry::Wvtt,
            b"evte" => SampleEntry::Evte,
            _ => SampleEntry::Unknown,
        }
    }

    /// The DASH `codecs=` prefix used for adaptation-set matching (spec §4.E).
    pub fn codec_prefix(self) -> &'static str {
        match self {
            SampleEntry::Avc1 => "avc1",
            SampleEntry::Hvc1 => "hvc1",
            SampleEntry::Mp4a => "mp4a",
            SampleEntry::Ac3 => "ac-3",
            SampleEntry::Ec3 => "ec-3",
            SampleEntry::Stpp => "stpp",
            SampleEntry::Wvtt => "wvtt",
            SampleEntry::Evte => "evte",
            SampleEntry::Unknown => "unknown",
        }
    }
}

/// `(channelName, trackName, extension)` derived from the upload URL (spec
/// §3 "Stream identifier"; `mediaType` is carried implicitly via `extension`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    pub channel: String,
    pub track: String,
    pub extension: Extension,
}

impl StreamKey {
    pub fn media_type(&self) -> MediaType {
        self.extension.media_type()
    }
}

/// Static per-representation overrides from the channels config file (spec
/// §6): language/role/bitrate/displayName pins and an `ignore` escape hatch
/// for tracks the operator never wants published in the MPD.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RepresentationConfig {
    pub name: String,
    pub language: Option<String>,
    pub role: Option<String>,
    pub display_name: Option<String>,
    pub bitrate: Option<u64>,
    pub ignore: bool,
}

/// Per-channel configuration, as read from the channels config file or
/// synthesized with defaults when a channel is lazily created on first PUT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub start_nr: u32,
    #[serde(default)]
    pub auth_user: Option<String>,
    #[serde(default)]
    pub auth_password: Option<String>,
    #[serde(default = "default_timeshift_buffer_depth_secs")]
    pub time_shift_buffer_depth_s: u32,
    #[serde(default)]
    pub receive_nr_raw_segments: u32,
    #[serde(default)]
    pub ignore: bool,
    #[serde(default)]
    pub reps: Vec<RepresentationConfig>,
}

fn default_timeshift_buffer_depth_secs() -> u32 {
    60
}

impl ChannelConfig {
    /// The configuration a channel gets when it is lazily created from a PUT
    /// to a name the config file never mentioned.
    pub fn default_for(name: &str) -> Self {
        ChannelConfig {
            name: name.to_string(),
            start_nr: 0,
            auth_user: None,
            auth_password: None,
            time_shift_buffer_depth_s: default_timeshift_buffer_depth_secs(),
            receive_nr_raw_segments: 0,
            ignore: false,
            reps: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_media_type_bijection() {
        for ext in [
            Extension::Cmfv,
            Extension::Cmfa,
            Extension::Cmft,
            Extension::Cmfm,
        ] {
            assert_eq!(ext.media_type().extension().as_str(), ext.as_str());
        }
    }

    #[test]
    fn unknown_suffix_rejected() {
        assert!(Extension::from_suffix("mp4").is_none());
    }
}
