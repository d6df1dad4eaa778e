use crate::config::BuildRequest;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, StageRegistry};
use crate::modules::Module;
use crate::modules::util::{format_bytes_gb, stage};
use crate::planner::Plan;

pub const PREFLIGHT: &str = "core.preflight";
pub const SETUP: &str = "core.setup";

pub struct CoreModule;

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _req: &BuildRequest) -> bool {
        true
    }

    fn plan(&self, _req: &BuildRequest, plan: &mut Plan) -> Result<()> {
        plan.add(stage(
            PREFLIGHT,
            "Preflight checks",
            self.id(),
            "preflight",
            &[],
            &["core:preflight"],
        ))?;
        plan.add(stage(
            SETUP,
            "Prepare build root",
            self.id(),
            "setup",
            &["core:preflight"],
            &["core:build-root"],
        ))?;
        Ok(())
    }
}

impl ModuleExec for CoreModule {
    fn register_stages(reg: &mut StageRegistry) -> Result<()> {
        reg.add(PREFLIGHT, exec_preflight)?;
        reg.add(SETUP, exec_setup)?;
        Ok(())
    }
}

pub fn required_tools(req: &BuildRequest) -> Vec<&'static str> {
    let mut tools = vec!["git", "bash"];
    if !req.run.skip_sync {
        tools.push("repo");
    }
    tools
}

fn exec_preflight(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;

    let mut missing = Vec::new();
    for tool in required_tools(req) {
        match ctx.tools.find_tool(tool) {
            Some(p) => ctx.log(&format!("found {tool}: {}", p.display())),
            None => missing.push(tool),
        }
    }
    if !missing.is_empty() {
        let msg = format!("required tools not found in PATH: {}", missing.join(", "));
        if ctx.dry_run {
            ctx.warn(&msg);
        } else {
            return Err(Error::environment(msg));
        }
    }

    // Checked here so a missing device tree fails before sync or clone touch anything.
    if req.run.skip_clone {
        let rel = req.device.device_tree_path();
        let dt = paths.resolve_under_root(&rel)?;
        if !dt.is_dir() {
            return Err(Error::config(format!(
                "--skip-clone requires the device tree at {}, but it does not exist",
                dt.display()
            )));
        }
        ctx.log(&format!("device tree present: {rel}"));
    }

    let need = req.run.min_free_bytes();
    match ctx.tools.free_space(&paths.root) {
        Some(free) if free < need => {
            ctx.warn(&format!(
                "only {} free at {} (recommended: {})",
                format_bytes_gb(free),
                paths.root.display(),
                format_bytes_gb(need)
            ));
            if !ctx.confirm("Low disk space. Continue anyway?", false)? {
                return Err(Error::cancelled("aborted due to insufficient disk space"));
            }
        }
        Some(free) => ctx.log(&format!("free disk space: {}", format_bytes_gb(free))),
        None => ctx.warn(&format!(
            "could not determine free disk space at {}",
            paths.root.display()
        )),
    }
    Ok(())
}

fn exec_setup(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = crate::workspace::init_dirs(&req.run.build_root)?;
    ctx.log(&format!("build_root = {}", paths.root.display()));
    ctx.log(&format!(
        "product_out = {}",
        paths.product_out(&req.device.codename).display()
    ));
    ctx.set_paths(paths);
    Ok(())
}
