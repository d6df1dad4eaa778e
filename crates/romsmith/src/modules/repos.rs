use crate::config::BuildRequest;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, StageRegistry};
use crate::modules::Module;
use crate::modules::util::{display_rel, ensure_dir, stage};
use crate::planner::Plan;
use crate::repos::{Resolution, resolve_all};
use crate::workspace::safe_remove_dir_all;

pub const CLEAN: &str = "repos.clean";
pub const CLONE: &str = "repos.clone";
pub const VERIFY: &str = "repos.verify";

pub struct ReposModule;

impl Module for ReposModule {
    fn id(&self) -> &'static str {
        "repos"
    }

    fn detect(&self, _req: &BuildRequest) -> bool {
        true
    }

    fn plan(&self, req: &BuildRequest, plan: &mut Plan) -> Result<()> {
        if req.run.clean_repos {
            plan.add(stage(
                CLEAN,
                "Remove device repositories",
                self.id(),
                "clean",
                &["sync:tree"],
                &["repos:cleaned"],
            ))?;
        }
        // Either clone the repositories or check that the device tree is still there.
        let s = if req.run.skip_clone {
            stage(
                VERIFY,
                "Verify device tree",
                self.id(),
                "verify",
                &["sync:tree", "repos:cleaned?"],
                &["repos:ready"],
            )
        } else {
            stage(
                CLONE,
                "Clone device repositories",
                self.id(),
                "clone",
                &["sync:tree", "repos:cleaned?"],
                &["repos:ready"],
            )
        };
        plan.add(s)
    }
}

impl ModuleExec for ReposModule {
    fn register_stages(reg: &mut StageRegistry) -> Result<()> {
        reg.add(CLEAN, exec_clean)?;
        reg.add(CLONE, exec_clone)?;
        reg.add(VERIFY, exec_verify)?;
        Ok(())
    }
}

// Best effort: anything that cannot be removed is reported and skipped.
fn exec_clean(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    for repo in &req.device.repositories {
        let Some(rel) = repo.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
            continue;
        };
        let dest = match paths.resolve_under_root(rel) {
            Ok(p) => p,
            Err(e) => {
                ctx.warn(&format!("{}: {e}", repo.key));
                continue;
            }
        };
        if ctx.dry_run {
            ctx.log(&format!("DRY-RUN: remove {rel}"));
            continue;
        }
        match safe_remove_dir_all(&paths.root, &dest) {
            Ok(true) => ctx.log(&format!("removed {rel}")),
            Ok(false) => {}
            Err(e) => ctx.warn(&format!("could not remove {rel}: {e}")),
        }
    }
    Ok(())
}

fn exec_clone(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let mut cloned = 0usize;
    let mut skipped = 0usize;

    for resolution in resolve_all(&req.device) {
        let repo = match resolution? {
            Resolution::Skip { key, reason } => {
                ctx.warn(&format!("skipping {key}: {reason}"));
                skipped += 1;
                continue;
            }
            Resolution::Clone(repo) => repo,
        };

        let dest = match paths.resolve_under_root(&repo.path) {
            Ok(p) => p,
            Err(e) if repo.optional => {
                ctx.warn(&format!("skipping {}: {e}", repo.key));
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e.context(format!("repository '{}'", repo.key))),
        };
        let rel = display_rel(&paths.root, &dest);
        if dest.exists() {
            ctx.log(&format!("{}: {rel} already present, leaving it as is", repo.key));
            continue;
        }

        ctx.log(&format!(
            "cloning {} ({}) into {rel}",
            repo.key,
            repo.branch.as_deref().unwrap_or("default branch")
        ));
        if let Some(parent) = dest.parent() {
            ensure_dir(parent)?;
        }
        match ctx.tools.clone_repo(ctx, &repo, &dest) {
            Ok(()) => cloned += 1,
            Err(e) if repo.optional => {
                ctx.warn(&format!("optional repository {} failed to clone: {e}", repo.key));
                skipped += 1;
            }
            Err(e) => {
                return Err(e.context(format!("failed to clone required repository '{}'", repo.key)));
            }
        }
    }

    ctx.log(&format!("repositories: cloned={cloned} skipped={skipped}"));
    Ok(())
}

// Preflight already checked this, but `--clean-repos` may have removed the tree since.
fn exec_verify(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let rel = req.device.device_tree_path();
    let dt = paths.resolve_under_root(&rel)?;
    if !dt.is_dir() {
        return Err(Error::config(format!(
            "--skip-clone requires the device tree at {}, but it is missing{}",
            dt.display(),
            if req.run.clean_repos {
                " (removed by --clean-repos)"
            } else {
                ""
            }
        )));
    }
    ctx.log(&format!("device tree present: {rel}"));
    Ok(())
}
