//! Container parsing and GOP caching: the Container Demuxer + GOP Cache
//! component (C3).

pub mod demux;
pub mod flv;
pub mod gop;

pub use demux::Demuxer;
pub use flv::{FlvTag, FlvTagType};
pub use gop::{ContainerFrame, FrameKind, Gop, GopCache};
