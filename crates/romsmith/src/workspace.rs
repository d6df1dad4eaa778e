use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Metadata directory left behind by a completed `repo init`/`repo sync`.
pub const SYNC_MARKER_DIR: &str = ".repo";

#[derive(Debug, Clone)]
pub struct BuildRootPaths {
    pub root: PathBuf,
    pub out_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl BuildRootPaths {
    pub fn sync_marker(&self) -> PathBuf {
        self.root.join(SYNC_MARKER_DIR)
    }

    pub fn has_sync_marker(&self) -> bool {
        self.sync_marker().is_dir()
    }

    /// `<root>/out/target/product/<codename>`
    pub fn product_out(&self, codename: &str) -> PathBuf {
        self.out_dir
            .join("target")
            .join("product")
            .join(codename)
    }

    // Repository paths in descriptors are relative to the build root and must stay inside it.
    pub fn resolve_under_root(&self, rel: &str) -> Result<PathBuf> {
        resolve_under(&self.root, rel)
    }
}

pub fn load_paths(build_root: &Path) -> Result<BuildRootPaths> {
    let raw = build_root.as_os_str();
    if raw.is_empty() {
        return Err(Error::environment("empty build root"));
    }
    let root = if build_root.is_absolute() {
        build_root.to_path_buf()
    } else {
        let cwd =
            std::env::current_dir().map_err(|e| Error::environment(format!("cwd error: {e}")))?;
        cwd.join(build_root)
    };
    Ok(BuildRootPaths {
        out_dir: root.join("out"),
        logs_dir: root.join("logs"),
        root,
    })
}

pub fn init_dirs(build_root: &Path) -> Result<BuildRootPaths> {
    let paths = load_paths(build_root)?;
    fs::create_dir_all(&paths.root).map_err(|e| {
        Error::environment(format!(
            "failed to create build root {}: {e}",
            paths.root.display()
        ))
    })?;
    Ok(paths)
}

fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Err(Error::config("empty relative path"));
    }
    let rel_pb = Path::new(rel);
    if rel_pb.is_absolute() {
        return Err(Error::config(format!(
            "invalid repository path '{rel}' (must be relative to the build root)"
        )));
    }
    if rel_pb
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::config(format!(
            "invalid repository path '{rel}' (contains '..')"
        )));
    }
    Ok(root.join(rel_pb))
}

/// Removes `dir` if it exists. Refuses anything outside `root` or the root itself.
/// Returns whether something was removed.
pub fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<bool> {
    if fs::symlink_metadata(dir).is_err() {
        return Ok(false);
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if !dir_can.starts_with(&root_can) || dir_can == root_can {
        return Err(Error::msg(format!(
            "refusing to remove '{}' (outside build root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    let meta = fs::symlink_metadata(dir)?;
    let res = if meta.is_dir() {
        fs::remove_dir_all(dir)
    } else {
        fs::remove_file(dir)
    };
    res.map_err(|e| Error::msg(format!("failed to remove {}: {e}", dir.display())))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_out_and_marker_are_rooted() {
        let paths = load_paths(Path::new("/tmp/romsmith-root")).expect("paths");
        assert_eq!(paths.sync_marker(), PathBuf::from("/tmp/romsmith-root/.repo"));
        assert_eq!(
            paths.product_out("pixel7"),
            PathBuf::from("/tmp/romsmith-root/out/target/product/pixel7")
        );
    }

    #[test]
    fn relative_build_root_is_anchored_at_cwd() {
        let paths = load_paths(Path::new("android")).expect("paths");
        assert!(paths.root.is_absolute());
        assert!(paths.root.ends_with("android"));
    }

    #[test]
    fn resolve_under_root_rejects_escapes() {
        let paths = load_paths(Path::new("/tmp/romsmith-root")).expect("paths");
        assert_eq!(
            paths
                .resolve_under_root("device/google/pixel7")
                .expect("relative"),
            PathBuf::from("/tmp/romsmith-root/device/google/pixel7")
        );
        assert!(paths.resolve_under_root("../elsewhere").is_err());
        assert!(paths.resolve_under_root("/etc").is_err());
        assert!(paths.resolve_under_root("  ").is_err());
    }

    #[test]
    fn safe_remove_ignores_missing_and_refuses_outside() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("root");
        let other = tmp.path().join("other");
        fs::create_dir_all(root.join("device/x/y")).expect("mkdir");
        fs::create_dir_all(&other).expect("mkdir other");

        assert!(!safe_remove_dir_all(&root, &root.join("missing")).expect("missing ok"));
        assert!(safe_remove_dir_all(&root, &root.join("device/x")).expect("remove"));
        assert!(!root.join("device/x").exists());
        assert!(safe_remove_dir_all(&root, &other).is_err());
        assert!(safe_remove_dir_all(&root, &root).is_err());
    }
}
