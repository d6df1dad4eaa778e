use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ManifestSettings;
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::repos::ResolvedRepo;

/// One method per external operation. Every call blocks until the tool exits and
/// reports only success or failure.
pub trait ToolAdapter: Send + Sync {
    fn find_tool(&self, name: &str) -> Option<PathBuf>;
    /// Free bytes on the filesystem holding `path` (or its nearest existing ancestor).
    fn free_space(&self, path: &Path) -> Option<u64>;
    fn sync_init(&self, ctx: &ExecCtx, root: &Path, manifest: &ManifestSettings) -> Result<()>;
    fn sync(&self, ctx: &ExecCtx, root: &Path, jobs: usize) -> Result<()>;
    fn clone_repo(&self, ctx: &ExecCtx, repo: &ResolvedRepo, dest: &Path) -> Result<()>;
    fn select_target(&self, ctx: &ExecCtx, root: &Path, combo: &str) -> Result<()>;
    fn clean(&self, ctx: &ExecCtx, root: &Path, combo: &str) -> Result<()>;
    fn compile(
        &self,
        ctx: &ExecCtx,
        root: &Path,
        combo: &str,
        target: &str,
        jobs: usize,
    ) -> Result<()>;
}

/// Shells out to `repo`, `git` and the platform's `build/envsetup.sh`.
pub struct SystemTools;

impl ToolAdapter for SystemTools {
    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn free_space(&self, path: &Path) -> Option<u64> {
        let existing = path.ancestors().find(|p| p.exists())?;
        free_bytes(existing)
    }

    fn sync_init(&self, ctx: &ExecCtx, root: &Path, manifest: &ManifestSettings) -> Result<()> {
        let mut cmd = Command::new("repo");
        cmd.current_dir(root)
            .arg("init")
            .arg("-u")
            .arg(&manifest.url)
            .arg("-b")
            .arg(&manifest.branch)
            .arg("--depth=1");
        ctx.run_cmd(cmd)
    }

    fn sync(&self, ctx: &ExecCtx, root: &Path, jobs: usize) -> Result<()> {
        let mut cmd = Command::new("repo");
        cmd.current_dir(root)
            .arg("sync")
            .arg("-c")
            .arg(format!("-j{}", jobs.max(1)))
            .arg("--force-sync")
            .arg("--no-tags")
            .arg("--no-clone-bundle")
            .arg("--optimized-fetch")
            .arg("--prune");
        ctx.run_cmd(cmd)
    }

    fn clone_repo(&self, ctx: &ExecCtx, repo: &ResolvedRepo, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg("--depth=1");
        if let Some(branch) = repo.branch.as_deref() {
            cmd.arg("-b").arg(branch);
        }
        cmd.arg(&repo.url).arg(dest);
        ctx.run_cmd(cmd)
    }

    fn select_target(&self, ctx: &ExecCtx, root: &Path, combo: &str) -> Result<()> {
        ctx.run_cmd(envsetup_cmd(root, combo, None)?)
    }

    fn clean(&self, ctx: &ExecCtx, root: &Path, combo: &str) -> Result<()> {
        ctx.run_cmd(envsetup_cmd(root, combo, Some("m installclean"))?)
    }

    fn compile(
        &self,
        ctx: &ExecCtx,
        root: &Path,
        combo: &str,
        target: &str,
        jobs: usize,
    ) -> Result<()> {
        check_shell_word("build target", target)?;
        let step = format!("m {target} -j{}", jobs.max(1));
        ctx.run_cmd(envsetup_cmd(root, combo, Some(&step))?)
    }
}

// Each build-system call runs in a fresh shell, so the environment setup and
// target selection are repeated before the actual step.
fn envsetup_cmd(root: &Path, combo: &str, step: Option<&str>) -> Result<Command> {
    check_shell_word("lunch combo", combo)?;
    let mut script = format!("source build/envsetup.sh && lunch {combo}");
    if let Some(step) = step {
        script.push_str(" && ");
        script.push_str(step);
    }
    let mut cmd = Command::new("bash");
    cmd.current_dir(root).arg("-c").arg(script);
    Ok(cmd)
}

fn check_shell_word(what: &str, s: &str) -> Result<()> {
    let ok = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(Error::config(format!(
            "invalid {what} '{s}' (allowed: a-zA-Z0-9_-.)"
        )))
    }
}

#[cfg(unix)]
fn free_bytes(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return None;
    }
    let avail = (st.f_bavail as u128).saturating_mul(st.f_frsize as u128);
    Some(avail.min(u64::MAX as u128) as u64)
}

#[cfg(not(unix))]
fn free_bytes(_path: &Path) -> Option<u64> {
    None
}
