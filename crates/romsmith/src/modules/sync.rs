use crate::config::BuildRequest;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, StageRegistry};
use crate::modules::Module;
use crate::modules::util::stage;
use crate::planner::Plan;

pub const RUN: &str = "sync.run";
pub const VERIFY: &str = "sync.verify";

pub struct SyncModule;

impl Module for SyncModule {
    fn id(&self) -> &'static str {
        "sync"
    }

    fn detect(&self, _req: &BuildRequest) -> bool {
        true
    }

    // Exactly one of the two stages provides the synced tree.
    fn plan(&self, req: &BuildRequest, plan: &mut Plan) -> Result<()> {
        let s = if req.run.skip_sync {
            stage(
                VERIFY,
                "Verify existing source sync",
                self.id(),
                "verify",
                &["core:build-root"],
                &["sync:tree"],
            )
        } else {
            stage(
                RUN,
                "Sync source tree",
                self.id(),
                "sync",
                &["core:build-root"],
                &["sync:tree"],
            )
        };
        plan.add(s)
    }
}

impl ModuleExec for SyncModule {
    fn register_stages(reg: &mut StageRegistry) -> Result<()> {
        reg.add(RUN, exec_sync)?;
        reg.add(VERIFY, exec_verify)?;
        Ok(())
    }
}

fn exec_sync(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let manifest = &req.device.manifest;
    ctx.log(&format!(
        "initializing manifest {} ({})",
        manifest.url, manifest.branch
    ));
    ctx.tools
        .sync_init(ctx, &paths.root, manifest)
        .map_err(|e| e.context("manifest init failed"))?;

    ctx.log(&format!("syncing with {} jobs...", req.run.jobs));
    ctx.tools
        .sync(ctx, &paths.root, req.run.jobs)
        .map_err(|e| e.context("source sync failed"))?;
    Ok(())
}

fn exec_verify(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let marker = paths.sync_marker();
    if !paths.has_sync_marker() {
        return Err(Error::environment(format!(
            "--skip-sync given but no previous sync found ({} is missing)",
            marker.display()
        )));
    }
    ctx.log(&format!("using existing sync at {}", paths.root.display()));
    Ok(())
}
