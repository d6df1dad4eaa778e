use std::path::Path;

use romsmith::config::{self, BuildRequest, RunConfig};

fn request(run: RunConfig) -> BuildRequest {
    let device = config::parse(
        Path::new("<mem>"),
        r#"{"device": {"codename": "pixel7", "manufacturer": "google"}}"#,
        None,
    )
    .unwrap();
    BuildRequest::new(device, run)
}

fn ordered_ids(run: RunConfig) -> Vec<String> {
    let plan = romsmith::modules::plan_for(&request(run)).unwrap();
    plan.ordered()
        .unwrap()
        .into_iter()
        .map(|s| s.id.clone())
        .collect()
}

#[test]
fn every_flag_combination_yields_an_ordered_plan() {
    for bits in 0..8u8 {
        let run = RunConfig {
            skip_sync: bits & 1 != 0,
            skip_clone: bits & 2 != 0,
            clean_repos: bits & 4 != 0,
            ..RunConfig::default()
        };
        let ids = ordered_ids(run.clone());

        assert_eq!(ids.first().map(String::as_str), Some("core.preflight"));
        assert_eq!(ids.last().map(String::as_str), Some("build.report"));
        assert_eq!(ids.contains(&"repos.clone".to_string()), !run.skip_clone);
        assert_eq!(ids.contains(&"repos.verify".to_string()), run.skip_clone);
        assert_eq!(ids.contains(&"repos.clean".to_string()), run.clean_repos);
        assert_eq!(ids.contains(&"sync.run".to_string()), !run.skip_sync);
        assert_eq!(ids.contains(&"sync.verify".to_string()), run.skip_sync);
    }
}

#[test]
fn build_waits_for_clean_and_clone_when_present() {
    let ids = ordered_ids(RunConfig {
        clean_repos: true,
        ..RunConfig::default()
    });
    let pos = |id: &str| ids.iter().position(|s| s == id).unwrap();
    assert!(pos("sync.run") < pos("repos.clean"));
    assert!(pos("repos.clean") < pos("repos.clone"));
    assert!(pos("repos.clone") < pos("build.compile"));
}

#[test]
fn device_tree_is_rechecked_after_clean_when_clone_is_skipped() {
    let ids = ordered_ids(RunConfig {
        skip_clone: true,
        clean_repos: true,
        ..RunConfig::default()
    });
    let pos = |id: &str| ids.iter().position(|s| s == id).unwrap();
    assert!(pos("repos.clean") < pos("repos.verify"));
    assert!(pos("repos.verify") < pos("build.compile"));
}

// Without clean, the optional deps of the compile and verify stages must not
// leave them unresolvable.
#[test]
fn compile_does_not_require_repo_clean() {
    let ids = ordered_ids(RunConfig {
        skip_clone: true,
        ..RunConfig::default()
    });
    assert_eq!(
        ids,
        vec![
            "core.preflight",
            "core.setup",
            "sync.run",
            "repos.verify",
            "build.compile",
            "build.report",
        ]
    );
}
