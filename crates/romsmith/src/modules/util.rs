use std::fs;
use std::path::Path;

use crate::error::{Error, Result};
use crate::planner::Stage;

pub fn stage(
    id: &str,
    label: &str,
    module: &str,
    phase: &str,
    after: &[&str],
    provides: &[&str],
) -> Stage {
    Stage {
        id: id.into(),
        label: label.into(),
        module: module.into(),
        phase: phase.into(),
        after: after.iter().map(|s| s.to_string()).collect(),
        provides: provides.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::environment(format!("failed to create dir {}: {e}", p.display())))
}

/// `path` relative to `root` when it lies inside it, for log lines.
pub fn display_rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

pub fn format_bytes_gb(bytes: u64) -> String {
    format!("{:.1} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_rel_strips_root() {
        let root = Path::new("/src/android");
        assert_eq!(
            display_rel(root, &root.join("device/google/pixel7")),
            "device/google/pixel7"
        );
        assert_eq!(display_rel(root, Path::new("/elsewhere")), "/elsewhere");
    }

    #[test]
    fn bytes_are_shown_in_gib() {
        assert_eq!(format_bytes_gb(3 * 1024 * 1024 * 1024 / 2), "1.5 GiB");
    }
}
