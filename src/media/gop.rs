//! GOP cache (C3, half of the Container Demuxer + GOP Cache component):
//! the bounded history described in spec §3/§4.3 — container header,
//! metadata record, and a count-bounded deque of closed groups-of-pictures,
//! plus the current possibly-open one.
//!
//! Reworked from the teacher's byte-size-bounded `GopBuffer` into the
//! count-bounded cache this system calls for: the structural shape (a
//! deque of frames, `is_ready`/`get_catchup_data`-style accessors, a
//! `#[cfg(test)] mod tests` alongside the code) is kept, the bounding
//! policy is not.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use super::flv::FlvTagType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Audio,
    Video,
    Script,
}

impl From<FlvTagType> for FrameKind {
    fn from(t: FlvTagType) -> Self {
        match t {
            FlvTagType::Audio => FrameKind::Audio,
            FlvTagType::Video => FrameKind::Video,
            FlvTagType::Script => FrameKind::Script,
        }
    }
}

/// One parsed container frame. `raw` includes the container's own
/// per-frame framing (tag header + payload + trailer, for an FLV-family
/// carrier) so replayed bytes are self-contained (§3).
#[derive(Debug, Clone)]
pub struct ContainerFrame {
    pub kind: FrameKind,
    pub raw: Bytes,
    pub timestamp: u32,
    pub is_keyframe: bool,
}

impl ContainerFrame {
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }
}

/// An ordered run of frames starting with exactly one video keyframe,
/// containing all audio/video/script frames up to (but excluding) the next
/// video keyframe.
#[derive(Debug, Default, Clone)]
pub struct Gop {
    frames: Vec<ContainerFrame>,
}

impl Gop {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self, frame: ContainerFrame) {
        self.frames.push(frame);
    }

    pub fn size_bytes(&self) -> usize {
        self.frames.iter().map(ContainerFrame::len).sum()
    }

    fn write_into(&self, buf: &mut BytesMut) {
        for frame in &self.frames {
            buf.extend_from_slice(&frame.raw);
        }
    }

    pub fn first_is_keyframe(&self) -> bool {
        self.frames
            .first()
            .map(|f| f.kind == FrameKind::Video && f.is_keyframe)
            .unwrap_or(false)
    }
}

/// Holds `header`, `metadata_frame`, up to `max_gop_count` closed GOPs, and
/// the current (possibly open) one. Rules 1–6 of spec §4.3 are implemented
/// here; byte-level parsing lives in [`super::demux`].
#[derive(Debug)]
pub struct GopCache {
    max_gop_count: usize,
    header: Option<Bytes>,
    metadata_frame: Option<Bytes>,
    closed: VecDeque<Gop>,
    current: Gop,
}

impl GopCache {
    pub fn new(max_gop_count: usize) -> Self {
        assert!(max_gop_count >= 1, "max_gop_count must be >= 1");
        Self {
            max_gop_count,
            header: None,
            metadata_frame: None,
            closed: VecDeque::new(),
            current: Gop::default(),
        }
    }

    pub fn set_header(&mut self, header: Bytes) {
        if self.header.is_none() {
            self.header = Some(header);
        }
    }

    pub fn has_header(&self) -> bool {
        self.header.is_some()
    }

    /// Feeds one parsed frame into the cache per rules 2–3 of §4.3.
    pub fn push_frame(&mut self, frame: ContainerFrame) {
        if frame.kind == FrameKind::Script && self.metadata_frame.is_none() {
            self.metadata_frame = Some(frame.raw.clone());
        }

        let is_keyframe_video = frame.kind == FrameKind::Video && frame.is_keyframe;
        if is_keyframe_video {
            if !self.current.is_empty() {
                self.close_current();
            }
            self.current.push(frame);
            return;
        }

        // audio, script, non-keyframe video: append only if a GOP is open
        if !self.current.is_empty() {
            self.current.push(frame);
        }
    }

    fn close_current(&mut self) {
        let closed = std::mem::take(&mut self.current);
        if self.closed.len() >= self.max_gop_count {
            self.closed.pop_front();
        }
        self.closed.push_back(closed);
    }

    /// ready ≡ header present ∧ metadata present ∧ (closed non-empty ∨
    /// current non-empty).
    pub fn ready(&self) -> bool {
        self.header.is_some()
            && self.metadata_frame.is_some()
            && (!self.closed.is_empty() || !self.current.is_empty())
    }

    /// header ⧺ metadata ⧺ (last closed GOP if any, else current GOP).
    pub fn initial_replay(&self) -> Option<Bytes> {
        if !self.ready() {
            return None;
        }
        let gop = self.closed.back().unwrap_or(&self.current);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(self.header.as_ref().unwrap());
        buf.extend_from_slice(self.metadata_frame.as_ref().unwrap());
        gop.write_into(&mut buf);
        Some(buf.freeze())
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.metadata_frame = None;
        self.closed.clear();
        self.current = Gop::default();
    }

    pub fn closed_gop_count(&self) -> usize {
        self.closed.len()
    }

    pub fn current_frame_count(&self) -> usize {
        self.current.frame_count()
    }

    pub fn cache_size_bytes(&self) -> usize {
        let header = self.header.as_ref().map(Bytes::len).unwrap_or(0);
        let metadata = self.metadata_frame.as_ref().map(Bytes::len).unwrap_or(0);
        let closed: usize = self.closed.iter().map(Gop::size_bytes).sum();
        header + metadata + closed + self.current.size_bytes()
    }
}
