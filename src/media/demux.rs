//! Container Demuxer (C3): parses an FLV-family byte stream fed in
//! arbitrary chunks into [`ContainerFrame`]s and drives a [`GopCache`].
//!
//! The numbers here (13-byte header, 11-byte tag header, 4-byte trailer)
//! are the FLV-family carrier spec §4.3 names as the common case; nothing
//! outside this module assumes FLV specifically. Grounded in the teacher's
//! `media/flv.rs` tag classification and in the parser shape of
//! `media/gop.rs`'s `GopBuffer::push`, generalized to a streaming, partial
//! chunk-aware parser (the teacher received whole RTMP messages already
//! framed by the protocol layer; here frames arrive as raw stdout bytes
//! that may split a tag header or payload across two reads).

use bytes::{Buf, Bytes, BytesMut};

use super::flv::{FlvTag, FlvTagType};
use super::gop::{ContainerFrame, FrameKind, GopCache};

const FLV_HEADER_LEN: usize = 13;
const TAG_HEADER_LEN: usize = 11;
const TRAILER_LEN: usize = 4;

pub struct Demuxer {
    buf: BytesMut,
    have_header: bool,
    cache: GopCache,
}

impl Demuxer {
    pub fn new(max_gop_count: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            have_header: false,
            cache: GopCache::new(max_gop_count),
        }
    }

    /// Feeds the next chunk of encoder stdout. Side-effects only the
    /// internal cache; the caller is responsible for broadcasting the raw
    /// chunk itself (rule 1 of §4.3: the live stream is independent of
    /// caching).
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        self.parse_available();
    }

    fn parse_available(&mut self) {
        if !self.have_header {
            if self.buf.len() < FLV_HEADER_LEN {
                return;
            }
            let header = self.buf.split_to(FLV_HEADER_LEN).freeze();
            if &header[0..3] != b"FLV" {
                tracing::warn!("invalid FLV header signature, capturing anyway");
            }
            self.cache.set_header(header);
            self.have_header = true;
        }

        loop {
            if self.buf.len() < TAG_HEADER_LEN {
                return;
            }

            let kind_byte = self.buf[0];
            let data_len = u24(&self.buf[1..4]);
            let ts_low = u24(&self.buf[4..7]);
            let ts_high = self.buf[7];
            let timestamp = ((ts_high as u32) << 24) | ts_low;

            let total_len = TAG_HEADER_LEN + data_len + TRAILER_LEN;
            if self.buf.len() < total_len {
                // wait for more bytes; declared length exceeds what's buffered
                return;
            }

            let raw = self.buf.split_to(total_len).freeze();
            let payload = raw.slice(TAG_HEADER_LEN..TAG_HEADER_LEN + data_len);

            let kind = match kind_byte {
                8 => FlvTagType::Audio,
                9 => FlvTagType::Video,
                18 => FlvTagType::Script,
                other => {
                    tracing::warn!(kind = other, "unrecognized FLV tag kind, dropping from cache");
                    continue;
                }
            };

            let is_keyframe = kind == FlvTagType::Video
                && FlvTag::video(timestamp, payload.clone()).is_keyframe();

            self.cache.push_frame(ContainerFrame {
                kind: FrameKind::from(kind),
                raw,
                timestamp,
                is_keyframe,
            });
        }
    }

    pub fn ready(&self) -> bool {
        self.cache.ready()
    }

    pub fn initial_replay(&self) -> Option<Bytes> {
        self.cache.initial_replay()
    }

    /// Discards all parser and cache state, including any partially
    /// buffered trailing bytes — called when the supervisor is stopped so
    /// a subsequent session does not splice its fresh header onto stale
    /// GOPs (§4.3 rule 6, §9 Design Notes).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.have_header = false;
        self.cache.reset();
    }

    pub fn closed_gop_count(&self) -> usize {
        self.cache.closed_gop_count()
    }

    pub fn current_frame_count(&self) -> usize {
        self.cache.current_frame_count()
    }

    pub fn cache_size_bytes(&self) -> usize {
        self.cache.cache_size_bytes()
    }
}

fn u24(bytes: &[u8]) -> usize {
    let mut buf = [0u8; 4];
    buf[1..4].copy_from_slice(bytes);
    (&buf[..]).get_u32() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flv_header() -> Vec<u8> {
        let mut h = vec![0x46, 0x4C, 0x56, 0x01, 0x05, 0, 0, 0, 9];
        h.extend_from_slice(&[0, 0, 0, 0]); // previous-tag-size sentinel
        h
    }

    fn tag(kind: u8, timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut t = Vec::new();
        t.push(kind);
        let len = payload.len() as u32;
        t.extend_from_slice(&len.to_be_bytes()[1..4]);
        t.extend_from_slice(&timestamp.to_be_bytes()[1..4]);
        t.push((timestamp >> 24) as u8);
        t.extend_from_slice(&[0, 0, 0]); // stream id
        t.extend_from_slice(payload);
        let total = (TAG_HEADER_LEN + payload.len()) as u32;
        t.extend_from_slice(&total.to_be_bytes());
        t
    }

    fn script_tag() -> Vec<u8> {
        tag(18, 0, b"onMetaData")
    }

    fn video_tag(timestamp: u32, keyframe: bool) -> Vec<u8> {
        let first_byte = if keyframe { 0x17 } else { 0x27 };
        tag(9, timestamp, &[first_byte, 0x01])
    }

    fn audio_tag(timestamp: u32) -> Vec<u8> {
        tag(8, timestamp, &[0xAF, 0x01])
    }

    #[test]
    fn not_ready_before_header_size_is_reached() {
        let mut d = Demuxer::new(2);
        d.feed(&flv_header()[..5]);
        assert!(!d.ready());
    }

    #[test]
    fn becomes_ready_after_header_metadata_and_keyframe() {
        let mut d = Demuxer::new(2);
        d.feed(&flv_header());
        d.feed(&script_tag());
        d.feed(&video_tag(0, true));
        assert!(d.ready());
    }

    #[test]
    fn partial_tag_across_chunks_waits_for_more_bytes() {
        let mut d = Demuxer::new(2);
        d.feed(&flv_header());
        d.feed(&script_tag());
        let vt = video_tag(0, true);
        d.feed(&vt[..vt.len() - 3]);
        assert!(!d.ready());
        d.feed(&vt[vt.len() - 3..]);
        assert!(d.ready());
    }

    #[test]
    fn keyframe_closes_previous_gop_and_initial_replay_starts_with_keyframe() {
        let mut d = Demuxer::new(2);
        d.feed(&flv_header());
        d.feed(&script_tag());
        d.feed(&video_tag(0, true));
        d.feed(&audio_tag(10));
        d.feed(&video_tag(33, true));

        assert_eq!(d.closed_gop_count(), 1);
        let replay = d.initial_replay().unwrap();
        // header(13) + script tag + first closed gop's single video tag
        let header_len = FLV_HEADER_LEN;
        let script_len = script_tag().len();
        let first_video = video_tag(0, true);
        assert_eq!(replay.len(), header_len + script_len + first_video.len());
    }

    #[test]
    fn reset_clears_partial_buffer_too() {
        let mut d = Demuxer::new(2);
        d.feed(&flv_header());
        d.feed(&script_tag());
        let vt = video_tag(0, true);
        d.feed(&vt[..vt.len() - 2]);
        d.reset();
        assert!(!d.ready());
        d.feed(&flv_header());
        d.feed(&script_tag());
        d.feed(&video_tag(0, true));
        assert!(d.ready());
    }

    #[test]
    fn frames_arriving_one_byte_at_a_time_still_parse_correctly() {
        let mut d = Demuxer::new(2);
        let mut all = flv_header();
        all.extend_from_slice(&script_tag());
        all.extend_from_slice(&video_tag(0, true));
        for byte in all {
            d.feed(&[byte]);
        }
        assert!(d.ready());
    }
}
