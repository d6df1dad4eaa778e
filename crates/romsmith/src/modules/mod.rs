use crate::config::BuildRequest;
use crate::error::Result;
use crate::planner::Plan;

pub mod build;
pub mod core;
pub mod repos;
pub mod sync;
pub mod util;

pub trait Module {
    fn id(&self) -> &'static str;
    fn detect(&self, req: &BuildRequest) -> bool;
    fn plan(&self, req: &BuildRequest, plan: &mut Plan) -> Result<()>;
}

pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(core::CoreModule),
        Box::new(sync::SyncModule),
        Box::new(repos::ReposModule),
        Box::new(build::BuildModule),
    ]
}

/// Stage plan for a request: every module that applies contributes its stages.
pub fn plan_for(req: &BuildRequest) -> Result<Plan> {
    let mut plan = Plan::default();
    for m in builtin_modules() {
        if m.detect(req) {
            m.plan(req, &mut plan)?;
        }
    }
    Ok(plan)
}
