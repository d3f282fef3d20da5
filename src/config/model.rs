//! Typed configuration record (C9), mirroring the JSON document of spec §6:
//! grounded in `original_source/src/config/config_parser.py`'s dataclasses
//! and the teacher's `server::ServerConfig` builder-with-defaults style.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_path() -> String {
    "/".to_string()
}

fn default_preset() -> Preset {
    Preset::Veryfast
}

fn default_tune() -> Tune {
    Tune::Zerolatency
}

fn default_crash_threshold() -> u32 {
    3
}

fn default_crash_window_secs() -> u64 {
    60
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_gop_count() -> usize {
    2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    H264,
    Hevc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Aac,
    Opus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tune {
    Film,
    Animation,
    Grain,
    Stillimage,
    Fastdecode,
    Zerolatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FfmpegSection {
    pub ffmpeg_path: PathBuf,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    pub bitrate: String,
    pub framerate: u32,
    #[serde(default = "default_preset")]
    pub preset: Preset,
    #[serde(default = "default_tune")]
    pub tune: Tune,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Screen {
        #[serde(default)]
        region: Option<RegionConfig>,
    },
    Window {
        /// Exact title, case-insensitive substring, or regex, tried in that
        /// priority order (§4.10).
        title_pattern: String,
        #[serde(default)]
        region: Option<RegionConfig>,
    },
    WindowBg {
        title_pattern: String,
        #[serde(default)]
        region: Option<RegionConfig>,
    },
    WindowRegion {
        title_pattern: String,
        region: RegionConfig,
    },
    NetworkStream {
        url: String,
        video_stream: String,
        #[serde(default)]
        audio_stream: Option<String>,
    },
}

impl SourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceConfig::Screen { .. } => "screen",
            SourceConfig::Window { .. } => "window",
            SourceConfig::WindowBg { .. } => "window_bg",
            SourceConfig::WindowRegion { .. } => "window_region",
            SourceConfig::NetworkStream { .. } => "network_stream",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessSection {
    #[serde(default = "default_crash_threshold")]
    pub crash_threshold: u32,
    #[serde(default = "default_crash_window_secs")]
    pub crash_window_secs: u64,
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_gop_count")]
    pub max_gop_count: usize,
}

impl Default for ProcessSection {
    fn default() -> Self {
        Self {
            crash_threshold: default_crash_threshold(),
            crash_window_secs: default_crash_window_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            max_gop_count: default_gop_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// One instance's fully materialized, typed configuration. `name` is not
/// part of the JSON document: it is the file stem the registry loaded it
/// from (§3: "the name doubles as a file-system identifier").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    #[serde(skip)]
    pub name: String,

    pub server: ServerSection,
    pub ffmpeg: FfmpegSection,
    pub source: SourceConfig,
    #[serde(default)]
    pub process: ProcessSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub description: Option<String>,
}
