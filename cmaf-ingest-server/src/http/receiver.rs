//! Receiver / HTTP front (component G): URL routing, Basic-Auth, and the
//! PUT/POST/DELETE ingest handler. Grounded on the teacher's
//! `http/handlers.rs`/`http/streams.rs` dispatch conventions, generalized
//! from "serve a VOD segment" to "accept and frame a live CMAF chunk".

use std::io::Cursor;
use std::sync::Arc;

/// Same `static OnceLock<Regex>` helper the teacher's `url.rs` uses to avoid
/// recompiling a pattern per call.
macro_rules! regex {
    ($re:literal $(,)?) => {{
        static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        RE.get_or_init(|| regex::Regex::new($re).unwrap())
    }};
}

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use base64::prelude::*;
use bytes::Bytes;
use tracing::warn;

use cmaf_ingest_core::{
    find_child, read_emsg_scheme_id_uri, read_moof_fields, styp_has_lmsg_brand, ChannelConfig,
    ChunkParser, Error as CoreError, Extension, IncomingSegment,
};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Resolved target of an ingest URL, once its channel/track/extension (or
/// MPD-upload channel) has been picked out of the path (spec §4.G routing).
#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadTarget {
    Mpd { channel: String },
    Media {
        channel: String,
        track: String,
        extension: Extension,
    },
}

/// Splits a path already stripped of the configured URL prefix into an
/// [`UploadTarget`], trying the three URL forms spec §6/§4.G give as regexes
/// in order: a verbatim-MPD upload, a MediaLive-style `Streams(track.ext)`
/// URL, and the plain `<channel>/<track>/<seqnr-or-init>.ext` form. The raw
/// sequence number in the filename is never trusted — the channel
/// normalizes off `mfhd.sequenceNumber` instead (spec §4.G point 6) — so
/// this function only needs to recover `(channel, track, extension)`.
fn parse_upload_path(path: &str) -> Result<UploadTarget> {
    if path.split('/').any(|segment| segment == "..") {
        return Err(ServerError::BadUrl(format!("path traversal attempt: {path}")));
    }
    let path = format!("/{}", path.trim_start_matches('/'));

    if let Some(caps) = regex!(r"^/(.*)/[^/]+\.mpd$").captures(&path) {
        return Ok(UploadTarget::Mpd {
            channel: caps[1].to_string(),
        });
    }

    if let Some(caps) = regex!(r"^/(.*)/Streams\((.+)(\.cmf[vatm])\)$").captures(&path) {
        return Ok(UploadTarget::Media {
            channel: caps[1].to_string(),
            track: caps[2].to_string(),
            extension: parse_extension(&caps[3])?,
        });
    }

    if let Some(caps) = regex!(r"^((.*)/)?([^/]+)/([^/]+)(\.cmf[vatm])$").captures(&path) {
        let channel = caps
            .get(2)
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ServerError::BadUrl(format!("no channel in upload path: {path}")))?;
        let track = caps[3].to_string();
        let stem = &caps[4];
        if stem != "init" && !stem.chars().all(|c| c.is_ascii_digit()) {
            return Err(ServerError::BadUrl(format!(
                "segment filename is neither 'init' nor numeric: {stem}"
            )));
        }
        return Ok(UploadTarget::Media {
            channel,
            track,
            extension: parse_extension(&caps[5])?,
        });
    }

    Err(ServerError::BadUrl(format!("unrecognized stream URL: {path}")))
}

fn parse_extension(dotted: &str) -> Result<Extension> {
    let suffix = dotted.trim_start_matches('.');
    Extension::from_suffix(suffix).ok_or_else(|| ServerError::BadUrl(format!("unsupported extension: {suffix}")))
}

/// Validates Basic-Auth against a channel's configured credentials (spec
/// §8 scenario 6): no `authUser` configured means no auth is required; an
/// `authUser` with no `authPassword` accepts any password for that user;
/// both set requires an exact match.
fn check_basic_auth(cfg: &ChannelConfig, headers: &HeaderMap) -> Result<()> {
    let Some(expected_user) = cfg.auth_user.as_deref() else {
        return Ok(());
    };

    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::AuthRequired(cfg.name.clone()))?;

    let encoded = header
        .strip_prefix("Basic ")
        .ok_or_else(|| ServerError::AuthRequired(cfg.name.clone()))?;
    let decoded = BASE64_STANDARD
        .decode(encoded)
        .map_err(|_| ServerError::AuthInvalid(cfg.name.clone()))?;
    let decoded = String::from_utf8(decoded).map_err(|_| ServerError::AuthInvalid(cfg.name.clone()))?;
    let (user, password) = decoded
        .split_once(':')
        .ok_or_else(|| ServerError::AuthInvalid(cfg.name.clone()))?;

    if user != expected_user {
        return Err(ServerError::AuthInvalid(cfg.name.clone()));
    }

    match cfg.auth_password.as_deref() {
        None => Ok(()),
        Some(expected_password) if expected_password == password => Ok(()),
        Some(_) => Err(ServerError::AuthInvalid(cfg.name.clone())),
    }
}

/// `DELETE {prefix}/*` — accepted, no-op; the timeshift window is cyclic by
/// count, not by explicit deletion (spec §4.G, Non-goals).
async fn handle_delete() -> Response {
    StatusCode::OK.into_response()
}

/// `PUT`/`POST {prefix}/*` — upload an init chunk, a media chunk, or a
/// verbatim MPD.
async fn handle_upload(
    state: Arc<AppState>,
    path: &str,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    state.metrics.record_bytes_received(body.len() as u64);
    let target = parse_upload_path(path)?;

    match target {
        UploadTarget::Mpd { channel } => {
            let channel_handle = state.channels.get_or_create(&channel)?;
            std::fs::write(channel_handle.dir.join("received.mpd"), &body)?;
            Ok(StatusCode::OK.into_response())
        }
        UploadTarget::Media {
            channel,
            track,
            extension,
        } => {
            let channel_handle = state.channels.get_or_create(&channel)?;
            check_basic_auth(&channel_handle.config, &headers)?;

            if channel_handle.is_ignored() {
                return Ok(StatusCode::OK.into_response());
            }

            let track_dir = channel_handle.dir.join(&track);
            std::fs::create_dir_all(&track_dir)?;

            let mut collected: Vec<IncomingSegment> = Vec::new();
            let mut parser = ChunkParser::new();
            parser.parse(Cursor::new(body.as_ref()), |chunk| {
                if chunk.is_init_segment {
                    channel_handle.add_init(&track, extension, chunk.data)?;
                    return Ok(());
                }

                let moof = find_child(&chunk.data, b"moof")
                    .ok_or(CoreError::MalformedBox("moof"))?;
                let fields = read_moof_fields(moof)?;
                let is_lmsg = find_child(&chunk.data, b"styp")
                    .map(styp_has_lmsg_brand)
                    .unwrap_or(false);
                let is_slate = find_child(&chunk.data, b"emsg")
                    .and_then(read_emsg_scheme_id_uri)
                    .map(|uri| uri.to_lowercase().contains("slate"))
                    .unwrap_or(false);

                let normalized = channel_handle.normalize_seq_nr(fields.sequence_number);
                let seg_path = track_dir.join(format!("{normalized}.{}", extension.as_str()));
                std::fs::write(&seg_path, &chunk.data).map_err(CoreError::StorageIo)?;

                collected.push(IncomingSegment {
                    track_name: track.clone(),
                    raw_seq_nr: fields.sequence_number,
                    raw_dts: fields.base_media_decode_time,
                    total_size: chunk.data.len() as u32,
                    nr_samples: fields.sample_count,
                    is_lmsg,
                    is_slate,
                });
                Ok(())
            })?;

            for seg in collected {
                channel_handle.submit_segment(seg).await?;
                state.metrics.record_segment_written();
            }

            Ok(StatusCode::OK.into_response())
        }
    }
}

pub async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.record_request(uri.path());

    if method == Method::DELETE {
        return handle_delete().await;
    }

    let after_prefix = match uri.path().strip_prefix(&state.config.url_prefix) {
        Some(rest) => rest,
        None => {
            state.metrics.record_error("bad_url");
            return ServerError::BadUrl(format!("path outside configured prefix: {}", uri.path()))
                .into_response();
        }
    };

    match handle_upload(state.clone(), after_prefix, headers, body).await {
        Ok(response) => response,
        Err(err) => {
            match &err {
                ServerError::AuthRequired(_) | ServerError::AuthInvalid(_) => {
                    state.metrics.record_error("auth");
                }
                ServerError::BadUrl(_) => state.metrics.record_error("bad_url"),
                ServerError::Core(CoreError::ProtocolSemantic(_)) => {
                    state.metrics.record_segment_dropped();
                }
                _ => {
                    warn!("upload handling failed: {err}");
                    state.metrics.record_error("internal");
                }
            }
            err.into_response()
        }
    }
}
