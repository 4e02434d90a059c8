//! Streaming chunk parser (component A): turns a byte reader into a sequence
//! of `Chunk`s without ever buffering a whole segment, by walking top-level
//! ISOBMFF boxes and closing a chunk at each `mdat` or at the boundary
//! between an init segment (`ftyp`+`moov`) and what follows it.

mod boxes;

pub use boxes::{
    find_child, read_audio_sample_entry_sample_rate, read_btrt_avg_bitrate,
    read_emsg_scheme_id_uri, read_hdlr_handler_type, read_kind_scheme_and_value, read_mdhd,
    read_mfhd_sequence_number, read_moof_fields, read_mvhd_creation_time, read_stsd_first_entry,
    read_tfdt_base_media_decode_time, read_trun_sample_count, read_visual_sample_entry_dimensions,
    rewrite_mdhd_timescale, scan_for_box, styp_has_lmsg_brand, walk_boxes, walk_boxes_mut,
    MdhdFields, MoofFields,
};

use crate::error::{Error, Result};
use std::io::Read;

const INITIAL_CAPACITY: usize = 64 * 1024;

/// One parsed chunk of the request body: either the coalesced init segment
/// (`ftyp`+`moov`), one `moof`+`mdat` media fragment, or — only at
/// end-of-input with a partial trailing chunk — whatever bytes remained.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub start_offset_within_segment: u64,
    pub is_init_segment: bool,
    pub data: Vec<u8>,
}

/// Box-by-box reader of a CMAF PUT/POST body. One instance per connection;
/// not `Send`-shared, not reused across requests.
pub struct ChunkParser {
    buf: Vec<u8>,
    filled: usize,
    emitted_offset: u64,
}

impl Default for ChunkParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkParser {
    pub fn new() -> Self {
        ChunkParser {
            buf: vec![0u8; INITIAL_CAPACITY],
            filled: 0,
            emitted_offset: 0,
        }
    }

    /// Drive the parser over `reader` until EOF, invoking `on_chunk` for each
    /// completed chunk. Propagates both reader errors and errors returned by
    /// `on_chunk`.
    pub fn parse<R, F>(&mut self, mut reader: R, mut on_chunk: F) -> Result<()>
    where
        R: Read,
        F: FnMut(Chunk) -> Result<()>,
    {
        let mut chunk_start = 0usize;
        let mut pos = 0usize;
        let mut pending_is_init = false;

        loop {
            if self.filled.saturating_sub(pos) < 8 {
                if !self.fill_to(&mut reader, pos + 8)? {
                    self.emit_remainder(chunk_start, pending_is_init, &mut on_chunk)?;
                    return Ok(());
                }
            }

            let size = u32::from_be_bytes(self.buf[pos..pos + 4].try_into().unwrap()) as usize;
            if size < 8 {
                return Err(Error::Parse(format!(
                    "box at offset {pos} declares size {size} < 8"
                )));
            }
            let box_type: [u8; 4] = self.buf[pos + 4..pos + 8].try_into().unwrap();
            let end = pos + size;

            if self.filled < end {
                if !self.fill_to(&mut reader, end)? {
                    self.emit_remainder(chunk_start, pending_is_init, &mut on_chunk)?;
                    return Ok(());
                }
            }

            if &box_type == b"moov" {
                pending_is_init = true;
                pos = end;
                continue;
            }

            if pending_is_init && &box_type != b"ftyp" {
                // first top-level box after moov: close the init chunk here.
                // This box itself is not consumed yet — it falls through
                // below and starts accumulating the next chunk.
                self.emit_chunk(chunk_start, pos, true, &mut on_chunk)?;
                chunk_start = pos;
                pending_is_init = false;
            }

            if &box_type == b"mdat" {
                pos = end;
                self.emit_chunk(chunk_start, pos, false, &mut on_chunk)?;
                chunk_start = pos;
            } else {
                pos = end;
            }

            if chunk_start > 0 && chunk_start == pos {
                self.compact(chunk_start);
                pos = 0;
                chunk_start = 0;
            }
        }
    }

    fn ensure_capacity(&mut self, required_end: usize) {
        if required_end > self.buf.len() {
            let new_len = required_end + 1024;
            self.buf.resize(new_len, 0);
        }
    }

    fn fill_to(&mut self, reader: &mut impl Read, needed: usize) -> Result<bool> {
        self.ensure_capacity(needed);
        while self.filled < needed {
            let n = reader.read(&mut self.buf[self.filled..])?;
            if n == 0 {
                return Ok(false);
            }
            self.filled += n;
        }
        Ok(true)
    }

    fn compact(&mut self, upto: usize) {
        self.buf.copy_within(upto..self.filled, 0);
        self.filled -= upto;
    }

    fn emit_chunk<F>(
        &mut self,
        start: usize,
        end: usize,
        is_init: bool,
        on_chunk: &mut F,
    ) -> Result<()>
    where
        F: FnMut(Chunk) -> Result<()>,
    {
        if end == start {
            return Ok(());
        }
        let data = self.buf[start..end].to_vec();
        let len = data.len() as u64;
        on_chunk(Chunk {
            start_offset_within_segment: self.emitted_offset,
            is_init_segment: is_init,
            data,
        })?;
        self.emitted_offset += len;
        Ok(())
    }

    /// Emit whatever bytes remain in the buffer at end-of-input as one final
    /// chunk. `pending_is_init` carries forward whether a `moov` was seen
    /// since the last chunk boundary without yet meeting a following
    /// top-level box to close it on — per spec §4.A a chunk containing
    /// `moov` is "flagged isInitSegment and emitted when the first non-init
    /// top-level box follows **or on end-of-input**", so a body that ends
    /// right after `ftyp`+`moov` (the common standalone init-segment PUT)
    /// must still come out tagged as an init chunk.
    fn emit_remainder<F>(
        &mut self,
        chunk_start: usize,
        pending_is_init: bool,
        on_chunk: &mut F,
    ) -> Result<()>
    where
        F: FnMut(Chunk) -> Result<()>,
    {
        if self.filled > chunk_start {
            let data = self.buf[chunk_start..self.filled].to_vec();
            let len = data.len() as u64;
            on_chunk(Chunk {
                start_offset_within_segment: self.emitted_offset,
                is_init_segment: pending_is_init,
                data,
            })?;
            self.emitted_offset += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn make_box(btype: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
        v.extend_from_slice(btype);
        v.extend_from_slice(payload);
        v
    }

    #[test]
    fn coalesces_ftyp_moov_into_one_init_chunk() {
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"....");
        let styp = make_box(b"styp", b"msdh");
        let moof = make_box(b"moof", b"....");
        let mdat = make_box(b"mdat", b"mediabytes");

        let mut body = Vec::new();
        body.extend_from_slice(&ftyp);
        body.extend_from_slice(&moov);
        body.extend_from_slice(&styp);
        body.extend_from_slice(&moof);
        body.extend_from_slice(&mdat);

        let mut parser = ChunkParser::new();
        let mut chunks = Vec::new();
        parser
            .parse(Cursor::new(body.clone()), |c| {
                chunks.push(c);
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_init_segment);
        assert_eq!(chunks[0].data, [ftyp.clone(), moov.clone()].concat());
        assert!(!chunks[1].is_init_segment);
        assert_eq!(
            chunks[1].data,
            [styp.clone(), moof.clone(), mdat.clone()].concat()
        );
    }

    #[test]
    fn concatenating_chunk_data_reproduces_original_bytes() {
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"....");
        let moof1 = make_box(b"moof", b"aaaa");
        let mdat1 = make_box(b"mdat", b"11111111");
        let moof2 = make_box(b"moof", b"bbbb");
        let mdat2 = make_box(b"mdat", b"22222222");

        let mut body = Vec::new();
        for part in [&ftyp, &moov, &moof1, &mdat1, &moof2, &mdat2] {
            body.extend_from_slice(part);
        }

        let mut parser = ChunkParser::new();
        let mut reassembled = Vec::new();
        parser
            .parse(Cursor::new(body.clone()), |c| {
                reassembled.extend_from_slice(&c.data);
                Ok(())
            })
            .unwrap();

        assert_eq!(reassembled, body);
    }

    #[test]
    fn trailing_partial_chunk_emitted_with_no_flags_at_eof() {
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"....");
        let moof = make_box(b"moof", b"aaaa");
        let mdat = make_box(b"mdat", b"11111111");

        let mut body = Vec::new();
        body.extend_from_slice(&ftyp);
        body.extend_from_slice(&moov);
        body.extend_from_slice(&moof);
        body.extend_from_slice(&mdat);
        body.extend_from_slice(&[0, 0, 0, 20]); // partial next box header, never completes

        let mut parser = ChunkParser::new();
        let mut chunks = Vec::new();
        parser
            .parse(Cursor::new(body), |c| {
                chunks.push(c);
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks.len(), 3);
        assert!(!chunks[2].is_init_segment);
        assert_eq!(chunks[2].data, vec![0, 0, 0, 20]);
    }

    #[test]
    fn standalone_init_segment_body_is_tagged_init_at_eof() {
        // The common case of a PUT whose entire body is `ftyp`+`moov` with
        // nothing following it: end-of-input is reached while `moov` is
        // still the last box seen, so the remainder emitted at EOF must
        // still carry `is_init_segment: true` (spec §4.A).
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"....");

        let mut body = Vec::new();
        body.extend_from_slice(&ftyp);
        body.extend_from_slice(&moov);

        let mut parser = ChunkParser::new();
        let mut chunks = Vec::new();
        parser
            .parse(Cursor::new(body.clone()), |c| {
                chunks.push(c);
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_init_segment);
        assert_eq!(chunks[0].data, body);
    }

    #[test]
    fn buffer_grows_past_initial_capacity() {
        let ftyp = make_box(b"ftyp", b"isom");
        let moov = make_box(b"moov", b"....");
        let moof = make_box(b"moof", b"aaaa");
        let big_payload = vec![7u8; INITIAL_CAPACITY + 4096];
        let mdat = make_box(b"mdat", &big_payload);

        let mut body = Vec::new();
        body.extend_from_slice(&ftyp);
        body.extend_from_slice(&moov);
        body.extend_from_slice(&moof);
        body.extend_from_slice(&mdat);

        let mut parser = ChunkParser::new();
        let mut chunks = Vec::new();
        parser
            .parse(Cursor::new(body), |c| {
                chunks.push(c);
                Ok(())
            })
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].data.len(), moof.len() + mdat.len());
    }
}
