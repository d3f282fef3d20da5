//! Source-Specific Command Assembly (C10): builds the encoder's argument
//! vector from an [`InstanceConfig`]. Grounded line-for-line in
//! `original_source/src/recorder/ffmpeg_builder.py` — the three input
//! variants, the shared video/audio/output arguments, and the deliberate
//! omission of `-flvflags no_duration_filesize` (kept here as a comment
//! because it is a load-bearing decision, not an oversight: dropping that
//! flag keeps the full FLV header and metadata needed for late joiners).

use regex::Regex;

use crate::config::{AudioCodec, InstanceConfig, Preset, RegionConfig, SourceConfig, Tune, VideoCodec};
use crate::error::StartupError;

pub type WindowHandle = u64;

/// Platform window lookup, deliberately left abstract: enumerating and
/// inspecting windows is a platform collaborator out of scope per spec §1.
/// This trait is the contract C10 needs from it.
pub trait WindowHelper: Send + Sync {
    fn find_by_exact_title(&self, title: &str) -> Option<WindowHandle>;
    fn find_by_substring(&self, needle: &str) -> Option<WindowHandle>;
    fn find_by_regex(&self, pattern: &Regex) -> Option<WindowHandle>;
    fn is_visible(&self, handle: WindowHandle) -> bool;
    fn is_minimized(&self, handle: WindowHandle) -> bool;
}

/// A `WindowHelper` that never finds anything, for platforms/tests with no
/// real window enumeration backend.
#[derive(Debug, Default)]
pub struct NullWindowHelper;

impl WindowHelper for NullWindowHelper {
    fn find_by_exact_title(&self, _title: &str) -> Option<WindowHandle> {
        None
    }
    fn find_by_substring(&self, _needle: &str) -> Option<WindowHandle> {
        None
    }
    fn find_by_regex(&self, _pattern: &Regex) -> Option<WindowHandle> {
        None
    }
    fn is_visible(&self, _handle: WindowHandle) -> bool {
        true
    }
    fn is_minimized(&self, _handle: WindowHandle) -> bool {
        false
    }
}

fn resolve_window(
    helper: &dyn WindowHelper,
    pattern: &str,
) -> Result<WindowHandle, StartupError> {
    if let Some(h) = helper.find_by_exact_title(pattern) {
        return Ok(h);
    }
    if let Some(h) = helper.find_by_substring(pattern) {
        return Ok(h);
    }
    if let Ok(re) = Regex::new(pattern) {
        if let Some(h) = helper.find_by_regex(&re) {
            return Ok(h);
        }
    }
    Err(StartupError::WindowNotFound(pattern.to_string()))
}

fn warn_if_window_unhealthy(helper: &dyn WindowHelper, handle: WindowHandle, title: &str) {
    if !helper.is_visible(handle) {
        tracing::warn!(window = title, "window is not visible, capture may be blank");
    }
    if helper.is_minimized(handle) {
        tracing::warn!(window = title, "window is minimized, capture may be blank");
    }
}

fn region_args(region: &RegionConfig) -> Vec<String> {
    vec![
        "-offset_x".to_string(),
        region.x.to_string(),
        "-offset_y".to_string(),
        region.y.to_string(),
        "-video_size".to_string(),
        format!("{}x{}", region.width, region.height),
    ]
}

fn screen_input_args(region: &Option<RegionConfig>, framerate: u32) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "gdigrab".to_string(),
        "-framerate".to_string(),
        framerate.to_string(),
        "-rtbufsize".to_string(),
        "100M".to_string(),
        "-i".to_string(),
        "desktop".to_string(),
    ];
    if let Some(region) = region {
        args.extend(region_args(region));
    }
    args
}

fn window_input_args(
    title_pattern: &str,
    region: &Option<RegionConfig>,
    framerate: u32,
    helper: &dyn WindowHelper,
) -> Result<Vec<String>, StartupError> {
    let handle = resolve_window(helper, title_pattern)?;
    warn_if_window_unhealthy(helper, handle, title_pattern);

    let mut args = vec![
        "-f".to_string(),
        "gdigrab".to_string(),
        "-framerate".to_string(),
        framerate.to_string(),
        "-rtbufsize".to_string(),
        "100M".to_string(),
        "-i".to_string(),
        format!("title={title_pattern}"),
    ];
    if let Some(region) = region {
        args.extend(region_args(region));
    }
    Ok(args)
}

fn network_stream_input_args(
    url: &str,
    video_stream: &str,
    audio_stream: &Option<String>,
) -> Vec<String> {
    let mut args = vec![
        "-buffer_size".to_string(),
        "32768000".to_string(),
        "-analyzeduration".to_string(),
        "1000000".to_string(),
        "-probesize".to_string(),
        "5000000".to_string(),
        "-max_delay".to_string(),
        "0".to_string(),
    ];

    let lowered = url.to_lowercase();
    if lowered.starts_with("rtsp://") {
        args.extend([
            "-rtsp_transport".to_string(),
            "tcp".to_string(),
            "-rtsp_flags".to_string(),
            "prefer_tcp".to_string(),
            "-fflags".to_string(),
            "+genpts+nobuffer".to_string(),
            "-flags".to_string(),
            "low_delay".to_string(),
        ]);
    } else if lowered.starts_with("rtmp://") {
        args.extend([
            "-fflags".to_string(),
            "+genpts+nobuffer".to_string(),
            "-flags".to_string(),
            "low_delay".to_string(),
        ]);
    } else if lowered.starts_with("http://") || lowered.starts_with("https://") {
        args.extend([
            "-headers".to_string(),
            "User-Agent: Mozilla/5.0".to_string(),
            "-fflags".to_string(),
            "+genpts+nobuffer".to_string(),
        ]);
    }

    args.extend(["-i".to_string(), url.to_string()]);

    // Stream selection is applied after the input, alongside the video/audio
    // encoding args — see build_encoder_argv.
    let _ = (video_stream, audio_stream);
    args
}

fn video_codec_name(codec: VideoCodec) -> &'static str {
    match codec {
        VideoCodec::H264 => "libx264",
        VideoCodec::Hevc => "libx265",
    }
}

fn audio_codec_name(codec: AudioCodec) -> &'static str {
    match codec {
        AudioCodec::Aac => "aac",
        AudioCodec::Opus => "libopus",
    }
}

fn preset_name(preset: Preset) -> &'static str {
    match preset {
        Preset::Ultrafast => "ultrafast",
        Preset::Superfast => "superfast",
        Preset::Veryfast => "veryfast",
        Preset::Faster => "faster",
        Preset::Fast => "fast",
        Preset::Medium => "medium",
        Preset::Slow => "slow",
        Preset::Slower => "slower",
        Preset::Veryslow => "veryslow",
    }
}

fn tune_name(tune: Tune) -> &'static str {
    match tune {
        Tune::Film => "film",
        Tune::Animation => "animation",
        Tune::Grain => "grain",
        Tune::Stillimage => "stillimage",
        Tune::Fastdecode => "fastdecode",
        Tune::Zerolatency => "zerolatency",
    }
}

fn video_args(config: &InstanceConfig) -> Vec<String> {
    vec![
        "-c:v".to_string(),
        video_codec_name(config.ffmpeg.video_codec).to_string(),
        "-preset".to_string(),
        preset_name(config.ffmpeg.preset).to_string(),
        "-tune".to_string(),
        tune_name(config.ffmpeg.tune).to_string(),
        "-profile:v".to_string(),
        "baseline".to_string(),
        "-level".to_string(),
        "3.1".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        config.ffmpeg.bitrate.clone(),
        "-g".to_string(),
        config.ffmpeg.framerate.to_string(),
    ]
}

fn audio_args(config: &InstanceConfig) -> Vec<String> {
    vec![
        "-c:a".to_string(),
        audio_codec_name(config.ffmpeg.audio_codec).to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
    ]
}

fn output_args() -> Vec<String> {
    vec!["-f".to_string(), "flv".to_string(), "pipe:1".to_string()]
}

/// Builds the full encoder argument vector (`argv[0]` is the ffmpeg binary
/// path itself, so it can be handed directly to
/// [`crate::process::EncoderSupervisor::start`]).
pub fn build_encoder_argv(
    config: &InstanceConfig,
    window_helper: &dyn WindowHelper,
) -> Result<Vec<String>, StartupError> {
    let mut argv = vec![config.ffmpeg.ffmpeg_path.display().to_string()];
    let framerate = config.ffmpeg.framerate;

    let is_network_stream = matches!(config.source, SourceConfig::NetworkStream { .. });

    match &config.source {
        SourceConfig::Screen { region } => {
            argv.extend(screen_input_args(region, framerate));
        }
        SourceConfig::Window {
            title_pattern,
            region,
        }
        | SourceConfig::WindowBg {
            title_pattern,
            region,
        } => {
            argv.extend(window_input_args(title_pattern, region, framerate, window_helper)?);
        }
        SourceConfig::WindowRegion {
            title_pattern,
            region,
        } => {
            argv.extend(window_input_args(
                title_pattern,
                &Some(region.clone()),
                framerate,
                window_helper,
            )?);
        }
        SourceConfig::NetworkStream {
            url,
            video_stream,
            audio_stream,
        } => {
            argv.extend(network_stream_input_args(url, video_stream, audio_stream));
        }
    }

    if is_network_stream {
        if let SourceConfig::NetworkStream {
            video_stream,
            audio_stream,
            ..
        } = &config.source
        {
            argv.extend(["-map".to_string(), format!("0:{video_stream}")]);
            if let Some(audio) = audio_stream {
                argv.extend(["-map".to_string(), format!("0:{audio}?")]);
            } else {
                argv.extend(["-map".to_string(), "0:a?".to_string()]);
            }
        }
    }

    argv.extend(video_args(config));
    argv.extend(audio_args(config));
    argv.extend(output_args());

    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FfmpegSection, LoggingSection, ProcessSection, ServerSection};

    struct FakeWindowHelper {
        titles: Vec<&'static str>,
    }

    impl WindowHelper for FakeWindowHelper {
        fn find_by_exact_title(&self, title: &str) -> Option<WindowHandle> {
            self.titles
                .iter()
                .position(|t| *t == title)
                .map(|i| i as u64)
        }
        fn find_by_substring(&self, needle: &str) -> Option<WindowHandle> {
            self.titles
                .iter()
                .position(|t| t.to_lowercase().contains(&needle.to_lowercase()))
                .map(|i| i as u64)
        }
        fn find_by_regex(&self, pattern: &Regex) -> Option<WindowHandle> {
            self.titles
                .iter()
                .position(|t| pattern.is_match(t))
                .map(|i| i as u64)
        }
        fn is_visible(&self, _handle: WindowHandle) -> bool {
            true
        }
        fn is_minimized(&self, _handle: WindowHandle) -> bool {
            false
        }
    }

    fn base_config(source: SourceConfig) -> InstanceConfig {
        InstanceConfig {
            name: "cam1".to_string(),
            server: ServerSection {
                port: Some(8765),
                host: "0.0.0.0".to_string(),
                path: "/".to_string(),
            },
            ffmpeg: FfmpegSection {
                ffmpeg_path: "ffmpeg".into(),
                video_codec: VideoCodec::H264,
                audio_codec: AudioCodec::Aac,
                bitrate: "2M".to_string(),
                framerate: 30,
                preset: Preset::Veryfast,
                tune: Tune::Zerolatency,
            },
            source,
            process: ProcessSection::default(),
            logging: LoggingSection::default(),
            description: None,
        }
    }

    #[test]
    fn screen_source_produces_gdigrab_desktop_input() {
        let config = base_config(SourceConfig::Screen { region: None });
        let argv = build_encoder_argv(&config, &NullWindowHelper).unwrap();
        assert!(argv.windows(2).any(|w| w == ["-i", "desktop"]));
        assert!(argv.contains(&"gdigrab".to_string()));
    }

    #[test]
    fn screen_region_adds_offset_and_size_args() {
        let config = base_config(SourceConfig::Screen {
            region: Some(RegionConfig {
                x: 10,
                y: 20,
                width: 640,
                height: 480,
            }),
        });
        let argv = build_encoder_argv(&config, &NullWindowHelper).unwrap();
        assert!(argv.contains(&"-offset_x".to_string()));
        assert!(argv.contains(&"640x480".to_string()));
    }

    #[test]
    fn window_source_resolves_exact_title_first() {
        let helper = FakeWindowHelper {
            titles: vec!["OBS Studio"],
        };
        let config = base_config(SourceConfig::Window {
            title_pattern: "OBS Studio".to_string(),
            region: None,
        });
        let argv = build_encoder_argv(&config, &helper).unwrap();
        assert!(argv.contains(&"title=OBS Studio".to_string()));
    }

    #[test]
    fn window_source_fails_when_nothing_matches() {
        let config = base_config(SourceConfig::Window {
            title_pattern: "Nonexistent Window".to_string(),
            region: None,
        });
        let err = build_encoder_argv(&config, &NullWindowHelper).unwrap_err();
        assert!(matches!(err, StartupError::WindowNotFound(_)));
    }

    #[test]
    fn network_stream_rtsp_gets_transport_and_low_delay_flags() {
        let config = base_config(SourceConfig::NetworkStream {
            url: "rtsp://example.com/stream".to_string(),
            video_stream: "v:0".to_string(),
            audio_stream: None,
        });
        let argv = build_encoder_argv(&config, &NullWindowHelper).unwrap();
        assert!(argv.contains(&"-rtsp_transport".to_string()));
        assert!(argv.contains(&"low_delay".to_string()));
        assert!(argv.windows(2).any(|w| w == ["-map", "0:v:0"]));
    }

    #[test]
    fn output_args_always_end_with_flv_pipe() {
        let config = base_config(SourceConfig::Screen { region: None });
        let argv = build_encoder_argv(&config, &NullWindowHelper).unwrap();
        assert_eq!(&argv[argv.len() - 3..], ["-f", "flv", "pipe:1"]);
    }

    #[test]
    fn keyframe_interval_equals_framerate() {
        let mut config = base_config(SourceConfig::Screen { region: None });
        config.ffmpeg.framerate = 24;
        let argv = build_encoder_argv(&config, &NullWindowHelper).unwrap();
        let g_pos = argv.iter().position(|a| a == "-g").unwrap();
        assert_eq!(argv[g_pos + 1], "24");
    }
}
