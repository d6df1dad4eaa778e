//! The build run as a whole: confirmation, stage execution and timing.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::BuildRequest;
use crate::error::Result;
use crate::executor::{ExecCtx, ExecEvent, builtin_registry, execute_plan};
use crate::modules::plan_for;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed {
        elapsed: Duration,
        artifact: Option<PathBuf>,
    },
    /// The user answered "no" at the confirmation gate. Not an error.
    Declined,
}

pub fn run(req: &BuildRequest, ctx: &mut ExecCtx) -> Result<Outcome> {
    let plan = plan_for(req)?;
    let reg = builtin_registry()?;

    ctx.notice(req.summary());
    if !ctx.confirm("Start the build with this configuration?", true)? {
        ctx.notice("Build aborted by user.");
        return Ok(Outcome::Declined);
    }

    let started = Instant::now();
    let res = execute_plan(req, &plan, &reg, ctx);
    let elapsed = started.elapsed();

    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: res.is_ok(),
        error: res.as_ref().err().map(ToString::to_string),
        elapsed_secs: elapsed.as_secs(),
        artifact: ctx.artifact().cloned(),
    });
    res?;

    Ok(Outcome::Completed {
        elapsed,
        artifact: ctx.artifact().cloned(),
    })
}
