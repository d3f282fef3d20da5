//! Config Model & Validator (C9).

pub mod loader;
pub mod model;
pub mod validator;

pub use loader::{load_directory, load_file, resolve_path};
pub use model::{
    AudioCodec, FfmpegSection, InstanceConfig, LogLevel, LoggingSection, Preset, ProcessSection,
    RegionConfig, ServerSection, SourceConfig, Tune, VideoCodec,
};
