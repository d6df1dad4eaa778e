use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

pub type StageId = String;

#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    pub label: String,
    pub module: String,
    pub phase: String,
    /// Stage ids or provide tokens; a trailing `?` marks the dependency as optional.
    pub after: Vec<String>,
    pub provides: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Plan {
    stages: BTreeMap<StageId, Stage>,
}

impl Plan {
    pub fn add(&mut self, stage: Stage) -> Result<()> {
        if self.stages.contains_key(&stage.id) {
            return Err(Error::msg(format!("duplicate stage id '{}'", stage.id)));
        }
        self.stages.insert(stage.id.clone(), stage);
        Ok(())
    }

    // Maps every provide token to the stage that produces it.
    fn providers(&self) -> Result<BTreeMap<&str, &str>> {
        let mut by_token = BTreeMap::new();
        for stage in self.stages.values() {
            for token in &stage.provides {
                if let Some(other) = by_token.insert(token.as_str(), stage.id.as_str()) {
                    return Err(Error::msg(format!(
                        "'{token}' is provided by both '{other}' and '{}'",
                        stage.id
                    )));
                }
            }
        }
        Ok(by_token)
    }

    /// Stage id a dependency points at, either directly or through a provide token.
    /// `None` means an optional (`?`) dependency nobody satisfies.
    fn target_of<'a>(
        &'a self,
        providers: &BTreeMap<&'a str, &'a str>,
        dep: &'a str,
    ) -> Result<Option<&'a str>> {
        let (name, optional) = match dep.strip_suffix('?') {
            Some(name) => (name, true),
            None => (dep, false),
        };
        let target = self
            .stages
            .get_key_value(name)
            .map(|(id, _)| id.as_str())
            .or_else(|| providers.get(name).copied());
        match target {
            Some(id) => Ok(Some(id)),
            None if optional => Ok(None),
            None => Err(Error::msg(format!("nothing provides '{name}'"))),
        }
    }

    /// Stages in dependency order. Among stages that are ready at the same time the
    /// smallest id goes first, so the order never changes between runs.
    pub fn ordered(&self) -> Result<Vec<&Stage>> {
        let providers = self.providers()?;

        let mut waiting: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for stage in self.stages.values() {
            let mut deps = BTreeSet::new();
            for dep in &stage.after {
                let target = self.target_of(&providers, dep).map_err(|e| {
                    e.context(format!("stage '{}' depends on '{dep}'", stage.id))
                })?;
                deps.extend(target);
            }
            waiting.insert(stage.id.as_str(), deps);
        }

        let mut out = Vec::with_capacity(waiting.len());
        while !waiting.is_empty() {
            let Some(next) = waiting
                .iter()
                .find_map(|(id, deps)| deps.is_empty().then_some(*id))
            else {
                let stuck: Vec<&str> = waiting.keys().copied().collect();
                return Err(Error::msg(format!(
                    "dependency cycle between stages: {}",
                    stuck.join(", ")
                )));
            };
            waiting.remove(next);
            for deps in waiting.values_mut() {
                deps.remove(next);
            }
            if let Some(stage) = self.stages.get(next) {
                out.push(stage);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(id: &str, after: &[&str], provides: &[&str]) -> Stage {
        Stage {
            id: id.into(),
            label: id.into(),
            module: "test".into(),
            phase: "test".into(),
            after: after.iter().map(|s| s.to_string()).collect(),
            provides: provides.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn ids(plan: &Plan) -> Vec<String> {
        plan.ordered()
            .expect("order")
            .into_iter()
            .map(|s| s.id.clone())
            .collect()
    }

    #[test]
    fn orders_by_dependencies_not_by_id() {
        let mut plan = Plan::default();
        plan.add(stage("z.first", &[], &["tok:first"])).expect("add");
        plan.add(stage("a.second", &["tok:first"], &[])).expect("add");
        plan.add(stage("m.third", &["a.second"], &[])).expect("add");
        assert_eq!(ids(&plan), vec!["z.first", "a.second", "m.third"]);
    }

    #[test]
    fn optional_dependency_may_be_absent() {
        let mut plan = Plan::default();
        plan.add(stage("build", &["repos:cleaned?", "sync"], &[])).expect("add");
        plan.add(stage("sync", &[], &[])).expect("add");
        assert_eq!(ids(&plan), vec!["sync", "build"]);
    }

    #[test]
    fn missing_required_dependency_is_an_error() {
        let mut plan = Plan::default();
        plan.add(stage("build", &["sync:tree"], &[])).expect("add");
        let err = plan.ordered().unwrap_err().to_string();
        assert!(err.contains("nothing provides 'sync:tree'"), "{err}");
    }

    #[test]
    fn rejects_duplicates_and_cycles() {
        let mut plan = Plan::default();
        plan.add(stage("a", &["b"], &[])).expect("add");
        assert!(plan.add(stage("a", &[], &[])).is_err());
        plan.add(stage("b", &["a"], &[])).expect("add");
        let err = plan.ordered().unwrap_err().to_string();
        assert!(err.contains("cycle"), "{err}");
    }

    #[test]
    fn duplicate_provide_token_is_rejected() {
        let mut plan = Plan::default();
        plan.add(stage("sync.run", &[], &["sync:tree"])).expect("add");
        plan.add(stage("sync.verify", &[], &["sync:tree"])).expect("add");
        assert!(plan.ordered().is_err());
    }
}
