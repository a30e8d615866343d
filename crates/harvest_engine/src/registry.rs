//! Reader for the channel registry CSV (`channel_id,channel_name_note,backup_enabled`).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use engine_logging::{engine_debug, engine_info};
use harvest_core::ChannelConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel registry not found: {0:?}")]
    NotFound(PathBuf),
    #[error("failed to read channel registry {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("channel registry {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },
}

const ID_COLUMNS: &[&str] = &["channel_id", "id"];
const LABEL_COLUMNS: &[&str] = &["channel_name_note", "label", "channel_name"];
const ENABLED_COLUMNS: &[&str] = &["backup_enabled", "enabled"];

/// Every row of the registry, in file order.
pub fn load_registry(path: &Path) -> Result<Vec<ChannelConfig>, RegistryError> {
    let content = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(RegistryError::NotFound(path.to_path_buf()))
        }
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_registry(&content).map_err(|reason| RegistryError::Format {
        path: path.to_path_buf(),
        reason,
    })
}

/// Rows with the enabled flag set; these form the worklist of a run.
pub fn enabled_channels(path: &Path) -> Result<Vec<ChannelConfig>, RegistryError> {
    let channels: Vec<ChannelConfig> = load_registry(path)?
        .into_iter()
        .filter(|c| c.enabled)
        .collect();
    engine_info!("{} channels enabled in {:?}", channels.len(), path);
    Ok(channels)
}

pub fn parse_registry(content: &str) -> Result<Vec<ChannelConfig>, String> {
    let mut lines = content
        .lines()
        .map(|l| l.trim_start_matches('\u{feff}'))
        .filter(|l| !l.trim().is_empty());

    let header = match lines.next() {
        Some(line) => split_csv_line(line),
        None => return Ok(Vec::new()),
    };
    let column = |names: &[&str]| {
        header
            .iter()
            .position(|h| names.iter().any(|n| h.trim().eq_ignore_ascii_case(n)))
    };
    let id_col = column(ID_COLUMNS).ok_or("missing channel_id column")?;
    let label_col = column(LABEL_COLUMNS);
    let enabled_col = column(ENABLED_COLUMNS).ok_or("missing backup_enabled column")?;

    let mut channels = Vec::new();
    for line in lines {
        let cells = split_csv_line(line);
        let cell = |i: usize| cells.get(i).map(|c| c.trim()).unwrap_or("");
        let id = cell(id_col);
        if id.is_empty() {
            engine_debug!("skipping registry row without channel id: {:?}", line);
            continue;
        }
        channels.push(ChannelConfig {
            id: id.to_string(),
            label: label_col.map(cell).unwrap_or("").to_string(),
            enabled: cell(enabled_col).eq_ignore_ascii_case("true"),
        });
    }
    Ok(channels)
}

/// Splits one CSV line, honouring double-quoted cells and `""` escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    cells.push(current);
    cells
}
