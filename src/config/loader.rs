//! Config discovery and loading (§4.9, §6): one JSON document per instance,
//! file name = instance name. Grounded in
//! `original_source/src/utils/path_helper.py` for relative-path resolution
//! against a project root, and in the teacher's `ServerConfig` builder
//! pattern for materializing defaults before validation runs.

use std::path::{Path, PathBuf};

use crate::error::ConfigValidationError;

use super::model::InstanceConfig;
use super::validator;

/// Resolves `path` against `root` when it is relative; returns `path`
/// unchanged when it is already absolute.
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Loads and validates a single instance config from `path`. The instance
/// name is taken from the file stem, not the JSON body.
pub fn load_file(path: &Path, project_root: &Path) -> Result<InstanceConfig, ConfigValidationError> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed")
        .to_string();

    let body = std::fs::read_to_string(path).map_err(|source| ConfigValidationError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut config: InstanceConfig =
        serde_json::from_str(&body).map_err(|source| ConfigValidationError::Parse {
            path: path.display().to_string(),
            source,
        })?;
    config.name = name;
    config.ffmpeg.ffmpeg_path = resolve_path(project_root, &config.ffmpeg.ffmpeg_path);
    if let Some(file) = config.logging.file.take() {
        config.logging.file = Some(resolve_path(project_root, &file));
    }

    validator::validate(&config)?;
    Ok(config)
}

/// Loads every `*.json` file directly under `dir` (non-recursive), skipping
/// none silently: a malformed config fails the whole load so a typo can
/// never result in a silently-missing instance.
pub fn load_directory(
    dir: &Path,
    project_root: &Path,
) -> Result<Vec<InstanceConfig>, ConfigValidationError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigValidationError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    let mut configs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ConfigValidationError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            configs.push(load_file(&path, project_root)?);
        }
    }
    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(dir: &Path, name: &str, body: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    const VALID_BODY: &str = r#"{
        "server": {"port": 8765, "path": "/"},
        "ffmpeg": {
            "ffmpeg_path": "ffmpeg",
            "video_codec": "h264",
            "audio_codec": "aac",
            "bitrate": "2M",
            "framerate": 30
        },
        "source": {"type": "screen"}
    }"#;

    #[test]
    fn loads_a_valid_config_and_names_it_by_file_stem() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "cam1.json", VALID_BODY);
        let cfg = load_file(&dir.path().join("cam1.json"), dir.path()).unwrap();
        assert_eq!(cfg.name, "cam1");
        assert_eq!(cfg.server.port, Some(8765));
    }

    #[test]
    fn resolves_relative_ffmpeg_path_against_project_root() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "cam1.json", VALID_BODY);
        let cfg = load_file(&dir.path().join("cam1.json"), dir.path()).unwrap();
        assert_eq!(cfg.ffmpeg.ffmpeg_path, dir.path().join("ffmpeg"));
    }

    #[test]
    fn rejects_invalid_config_at_load_time() {
        let dir = tempfile::tempdir().unwrap();
        let bad = VALID_BODY.replace("\"port\": 8765", "\"port\": 80");
        write_config(dir.path(), "cam1.json", &bad);
        assert!(load_file(&dir.path().join("cam1.json"), dir.path()).is_err());
    }

    #[test]
    fn loads_every_json_file_in_a_directory_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_config(dir.path(), "zeta.json", VALID_BODY);
        write_config(dir.path(), "alpha.json", VALID_BODY);
        let configs = load_directory(dir.path(), dir.path()).unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].name, "alpha");
        assert_eq!(configs[1].name, "zeta");
    }
}
