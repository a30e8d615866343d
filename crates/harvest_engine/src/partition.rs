use std::path::{Path, PathBuf};

use harvest_core::HarvestWindow;

/// Directory for a window: `{root}/{channel}/{YYYY}/{MM}`.
pub fn partition_dir(root: &Path, window: &HarvestWindow) -> PathBuf {
    root.join(sanitize_component(&window.channel_id))
        .join(window.date.format("%Y").to_string())
        .join(window.date.format("%m").to_string())
}

/// File name for a window: `{channel}_{YYYY-MM-DD}.tsv`.
pub fn partition_filename(window: &HarvestWindow) -> String {
    format!(
        "{}_{}.tsv",
        sanitize_component(&window.channel_id),
        window.date.format("%Y-%m-%d")
    )
}

pub fn partition_path(root: &Path, window: &HarvestWindow) -> PathBuf {
    partition_dir(root, window).join(partition_filename(window))
}

/// Channel ids are opaque; keep them from escaping the archive root.
fn sanitize_component(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['.', ' '][..]);
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}
