use std::{fs, io::Write, path::Path};

use anyhow::{anyhow, ensure, Context, Result};
use tempfile::NamedTempFile;

/// Directory holding `path`, `.` for bare file names.
fn parent_dir(path: &Path) -> &Path {
    path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."))
}

/// Delete a shapefile together with all of its sidecar files (`<stem>.*`).
///
/// Only `.shp` paths are accepted; anything else is rejected without touching
/// the filesystem. Returns the number of files removed.
pub fn delete_layer(path: &Path) -> Result<usize> {
    ensure!(path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("shp")),
        "Refusing to delete {}: not a .shp path", path.display());
    let stem = path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("Invalid shapefile name: {}", path.display()))?;
    let prefix = format!("{stem}.");

    let dir = parent_dir(path);
    let mut removed = 0;
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list directory {}", dir.display()))? {
        let entry = entry?;
        let matches = entry.file_name().to_str().is_some_and(|name| name.starts_with(&prefix));
        if matches && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())
                .with_context(|| format!("Failed to delete {}", entry.path().display()))?;
            removed += 1;
        }
    }

    tracing::debug!(path = %path.display(), removed, "deleted layer");
    Ok(removed)
}

/// Write `bytes` next to `path` first, then move them into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))
        .with_context(|| format!("Failed to create temporary file for {}", path.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| anyhow!("Failed to move output into place at {}: {}", path.display(), e.error))?;
    Ok(())
}
