//! Validation rules for [`InstanceConfig`], grounded in
//! `original_source/src/config/config_validator.py`: each field is checked
//! independently and the validator stops at the first failing field,
//! returning a human-readable message (§4.9).

use regex::Regex;

use crate::error::ConfigValidationError;
use crate::router;

use super::model::{InstanceConfig, RegionConfig, SourceConfig};

fn fail(field: &str, message: impl Into<String>) -> ConfigValidationError {
    ConfigValidationError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

pub fn validate(config: &InstanceConfig) -> Result<(), ConfigValidationError> {
    validate_server(config)?;
    validate_ffmpeg(config)?;
    validate_source(config)?;
    validate_process(config)?;
    Ok(())
}

fn validate_server(config: &InstanceConfig) -> Result<(), ConfigValidationError> {
    if let Some(port) = config.server.port {
        if !(1024..=65535).contains(&port) {
            return Err(fail(
                "server.port",
                format!("must be between 1024 and 65535, got {port}"),
            ));
        }
    }
    router::validate_path(&config.server.path)
        .map_err(|e| fail("server.path", e.to_string()))?;
    Ok(())
}

fn validate_ffmpeg(config: &InstanceConfig) -> Result<(), ConfigValidationError> {
    let ffmpeg = &config.ffmpeg;

    let bitrate_pattern = Regex::new(r"^\d+[KkMm]$").expect("static regex is valid");
    if !bitrate_pattern.is_match(&ffmpeg.bitrate) {
        return Err(fail(
            "ffmpeg.bitrate",
            format!(
                "invalid bitrate format `{}`, expected e.g. 2M, 500K",
                ffmpeg.bitrate
            ),
        ));
    }

    if !(1..=120).contains(&ffmpeg.framerate) {
        return Err(fail(
            "ffmpeg.framerate",
            format!("must be between 1 and 120, got {}", ffmpeg.framerate),
        ));
    }

    Ok(())
}

fn validate_region(field: &str, region: &RegionConfig) -> Result<(), ConfigValidationError> {
    if region.width == 0 || region.height == 0 {
        return Err(fail(field, "width and height must be greater than 0"));
    }
    if region.x < 0 || region.y < 0 {
        return Err(fail(field, "x and y must not be negative"));
    }
    Ok(())
}

fn validate_source(config: &InstanceConfig) -> Result<(), ConfigValidationError> {
    match &config.source {
        SourceConfig::Screen { region } => {
            if let Some(region) = region {
                validate_region("source.region", region)?;
            }
        }
        SourceConfig::Window {
            title_pattern,
            region,
        }
        | SourceConfig::WindowBg {
            title_pattern,
            region,
        } => {
            if title_pattern.trim().is_empty() {
                return Err(fail("source.title_pattern", "must not be empty"));
            }
            if let Some(region) = region {
                validate_region("source.region", region)?;
            }
        }
        SourceConfig::WindowRegion {
            title_pattern,
            region,
        } => {
            if title_pattern.trim().is_empty() {
                return Err(fail("source.title_pattern", "must not be empty"));
            }
            validate_region("source.region", region)?;
        }
        SourceConfig::NetworkStream {
            url,
            video_stream,
            audio_stream: _,
        } => {
            let supported = ["rtsp://", "rtmp://", "http://", "https://"];
            if url.is_empty() || !supported.iter().any(|p| url.starts_with(p)) {
                return Err(fail(
                    "source.url",
                    format!(
                        "must start with one of {} (got `{url}`)",
                        supported.join(", ")
                    ),
                ));
            }
            if video_stream.trim().is_empty() {
                return Err(fail(
                    "source.video_stream",
                    "network streams require an explicit video stream selector",
                ));
            }
        }
    }
    Ok(())
}

fn validate_process(config: &InstanceConfig) -> Result<(), ConfigValidationError> {
    let process = &config.process;
    if process.crash_threshold < 1 {
        return Err(fail("process.crash_threshold", "must be at least 1"));
    }
    if process.crash_window_secs < 1 {
        return Err(fail("process.crash_window_secs", "must be at least 1"));
    }
    if process.max_gop_count < 1 {
        return Err(fail("process.max_gop_count", "must be at least 1"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::{FfmpegSection, LoggingSection, ProcessSection, ServerSection};

    fn valid_config() -> InstanceConfig {
        InstanceConfig {
            name: "cam1".to_string(),
            server: ServerSection {
                port: Some(8765),
                host: "0.0.0.0".to_string(),
                path: "/".to_string(),
            },
            ffmpeg: FfmpegSection {
                ffmpeg_path: "ffmpeg".into(),
                video_codec: super::super::model::VideoCodec::H264,
                audio_codec: super::super::model::AudioCodec::Aac,
                bitrate: "2M".to_string(),
                framerate: 30,
                preset: super::super::model::Preset::Veryfast,
                tune: super::super::model::Tune::Zerolatency,
            },
            source: SourceConfig::Screen { region: None },
            process: ProcessSection::default(),
            logging: LoggingSection::default(),
            description: None,
        }
    }

    #[test]
    fn accepts_a_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn rejects_out_of_range_port() {
        let mut c = valid_config();
        c.server.port = Some(80);
        let err = validate(&c).unwrap_err();
        assert!(matches!(err, ConfigValidationError::InvalidField { field, .. } if field == "server.port"));
    }

    #[test]
    fn rejects_malformed_bitrate() {
        let mut c = valid_config();
        c.ffmpeg.bitrate = "2MB".to_string();
        assert!(validate(&c).is_err());
    }

    #[test]
    fn rejects_framerate_out_of_range() {
        let mut c = valid_config();
        c.ffmpeg.framerate = 0;
        assert!(validate(&c).is_err());
    }

    #[test]
    fn rejects_empty_window_title_pattern() {
        let mut c = valid_config();
        c.source = SourceConfig::Window {
            title_pattern: "   ".to_string(),
            region: None,
        };
        assert!(validate(&c).is_err());
    }

    #[test]
    fn rejects_network_stream_without_supported_protocol() {
        let mut c = valid_config();
        c.source = SourceConfig::NetworkStream {
            url: "ftp://example.com".to_string(),
            video_stream: "0".to_string(),
            audio_stream: None,
        };
        assert!(validate(&c).is_err());
    }

    #[test]
    fn rejects_zero_crash_threshold() {
        let mut c = valid_config();
        c.process.crash_threshold = 0;
        assert!(validate(&c).is_err());
    }
}
