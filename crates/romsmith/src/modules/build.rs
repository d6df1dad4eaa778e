use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;

use crate::config::BuildRequest;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, StageRegistry};
use crate::modules::Module;
use crate::modules::util::stage;
use crate::planner::Plan;

pub const COMPILE: &str = "build.compile";
pub const REPORT: &str = "build.report";

pub struct BuildModule;

impl Module for BuildModule {
    fn id(&self) -> &'static str {
        "build"
    }

    fn detect(&self, _req: &BuildRequest) -> bool {
        true
    }

    fn plan(&self, _req: &BuildRequest, plan: &mut Plan) -> Result<()> {
        plan.add(stage(
            COMPILE,
            "Build ROM",
            self.id(),
            "compile",
            &["sync:tree", "repos:cleaned?", "repos:ready?"],
            &["build:output"],
        ))?;
        plan.add(stage(
            REPORT,
            "Locate build output",
            self.id(),
            "report",
            &["build:output"],
            &[],
        ))?;
        Ok(())
    }
}

impl ModuleExec for BuildModule {
    fn register_stages(reg: &mut StageRegistry) -> Result<()> {
        reg.add(COMPILE, exec_compile)?;
        reg.add(REPORT, exec_report)?;
        Ok(())
    }
}

fn exec_compile(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let device = &req.device;
    let combo = device.lunch_combo();

    ctx.log(&format!("lunch {combo}"));
    ctx.tools
        .select_target(ctx, &paths.root, &combo)
        .map_err(|e| e.context(format!("could not select build target '{combo}'")))?;

    if req.run.clean_first {
        ctx.log("running installclean before the build");
        ctx.tools
            .clean(ctx, &paths.root, &combo)
            .map_err(|e| e.context("installclean failed"))?;
    }

    ctx.log(&format!(
        "building '{}' with {} jobs",
        device.build_target, req.run.jobs
    ));
    ctx.tools
        .compile(ctx, &paths.root, &combo, &device.build_target, req.run.jobs)
        .map_err(|e| e.context("build failed"))?;
    Ok(())
}

fn exec_report(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<()> {
    let paths = ctx.build_root(req)?;
    let out = paths.product_out(&req.device.codename);
    let artifact = find_artifact(&out, &req.device.product_prefix)?;
    match artifact.as_ref() {
        Some(a) => ctx.log(&format!("artifact: {}", a.display())),
        None => ctx.log(&format!("no output package found in {}", out.display())),
    }
    ctx.set_artifact(artifact);
    Ok(())
}

pub fn artifact_pattern(product_prefix: &str) -> Result<Regex> {
    Regex::new(&format!(r"^{}-.+\.zip$", regex::escape(product_prefix)))
        .map_err(|e| Error::msg(format!("invalid artifact pattern: {e}")))
}

/// Newest `<prefix>-*.zip` directly inside `dir`. A missing directory means no artifact.
pub fn find_artifact(dir: &Path, product_prefix: &str) -> Result<Option<PathBuf>> {
    let pattern = artifact_pattern(product_prefix)?;
    let Ok(entries) = fs::read_dir(dir) else {
        return Ok(None);
    };

    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !pattern.is_match(name) || !path.is_file() {
            continue;
        }
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let newer = match best.as_ref() {
            Some((t, p)) => modified > *t || (modified == *t && path > *p),
            None => true,
        };
        if newer {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}
