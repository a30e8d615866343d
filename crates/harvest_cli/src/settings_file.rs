use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use engine_logging::{engine_debug, engine_info};
use harvest_engine::{AtomicFileWriter, HarvestSettings};

/// Picked up from the working directory when `--config` is not given.
pub(crate) const DEFAULT_SETTINGS_FILENAME: &str = "harvest.ron";

/// Settings from `path`, or from `./harvest.ron` if present, or defaults.
///
/// An explicitly named file must exist; the implicit one is optional.
pub(crate) fn load_settings(path: Option<&Path>) -> Result<HarvestSettings> {
    let (path, explicit) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_FILENAME), false),
    };

    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
            engine_debug!("no settings file at {:?}; using defaults", path);
            return Ok(HarvestSettings::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read settings from {:?}", path))
        }
    };

    let settings = parse_settings(&content)
        .with_context(|| format!("failed to parse settings from {:?}", path))?;
    engine_info!("loaded settings from {:?}", path);
    Ok(settings)
}

pub(crate) fn parse_settings(content: &str) -> Result<HarvestSettings> {
    let settings: HarvestSettings = ron::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

pub(crate) fn render_settings(settings: &HarvestSettings) -> Result<String> {
    let pretty = ron::ser::PrettyConfig::new();
    Ok(ron::ser::to_string_pretty(settings, pretty)?)
}

/// Writes `settings` to `path` through a temp file and a rename.
pub(crate) fn save_settings(path: &Path, settings: &HarvestSettings) -> Result<PathBuf> {
    let content = render_settings(settings)?;
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("settings path {:?} has no file name", path))?;

    let written = AtomicFileWriter::new(dir).write(filename, content.as_bytes())?;
    engine_info!("settings written to {:?}", written);
    Ok(written)
}
