pub mod alert_distances;
pub mod settings;
pub mod tp;

pub use alert_distances::AlertDistanceConfig;
pub use settings::SettingsStore;
pub use tp::TpConfig;

use std::path::Path;

/// Atomically rewrites a JSON config file: write to a sibling temp file,
/// then rename over the target.
pub(crate) fn write_json_atomic(path: &Path, value: &impl serde::Serialize) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, raw)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
