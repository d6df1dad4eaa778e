#![allow(dead_code)]

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};

use romsmith::config::{self, BuildRequest, ManifestSettings, RunConfig, Variant};
use romsmith::executor::{ChannelSink, ExecCtx, ExecEvent};
use romsmith::pipeline::{self, Outcome};
use romsmith::prompt::ScriptedPrompt;
use romsmith::repos::ResolvedRepo;
use romsmith::tools::ToolAdapter;
use romsmith::{Error, Result};

/// Records every call and fakes the on-disk effects of the real tools.
pub struct FakeTools {
    calls: Mutex<Vec<String>>,
    failing: BTreeSet<String>,
    missing_tools: BTreeSet<String>,
    free: Option<u64>,
    artifact: Option<String>,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: BTreeSet::new(),
            missing_tools: BTreeSet::new(),
            free: Some(1 << 50),
            artifact: None,
        }
    }
}

impl FakeTools {
    /// `op` is `init`, `sync`, `lunch`, `installclean`, `m` or `clone:<key>`.
    pub fn failing(mut self, op: &str) -> Self {
        self.failing.insert(op.to_string());
        self
    }

    pub fn missing_tool(mut self, name: &str) -> Self {
        self.missing_tools.insert(name.to_string());
        self
    }

    pub fn free_space(mut self, free: Option<u64>) -> Self {
        self.free = free;
        self
    }

    /// File the fake build drops into `out/target/product/<codename>/`.
    pub fn producing(mut self, file_name: &str) -> Self {
        self.artifact = Some(file_name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|g| g.clone()).unwrap_or_default()
    }

    fn record(&self, op: &str, call: String) -> Result<()> {
        self.calls.lock().expect("calls lock").push(call);
        if self.failing.contains(op) {
            return Err(Error::tool(format!("{op} failed: exit status: 1")));
        }
        Ok(())
    }
}

fn codename_of(combo: &str) -> &str {
    let (_, rest) = combo.split_once('_').expect("combo has prefix");
    rest.rsplit_once('-').map(|(c, _)| c).expect("combo has variant")
}

impl ToolAdapter for FakeTools {
    fn find_tool(&self, name: &str) -> Option<PathBuf> {
        if self.missing_tools.contains(name) {
            None
        } else {
            Some(PathBuf::from("/usr/bin").join(name))
        }
    }

    fn free_space(&self, _path: &Path) -> Option<u64> {
        self.free
    }

    fn sync_init(&self, _ctx: &ExecCtx, root: &Path, manifest: &ManifestSettings) -> Result<()> {
        self.record("init", format!("init {} {}", manifest.url, manifest.branch))?;
        fs::create_dir_all(root.join(".repo"))?;
        Ok(())
    }

    fn sync(&self, _ctx: &ExecCtx, _root: &Path, jobs: usize) -> Result<()> {
        self.record("sync", format!("sync -j{jobs}"))
    }

    fn clone_repo(&self, _ctx: &ExecCtx, repo: &ResolvedRepo, dest: &Path) -> Result<()> {
        self.record(
            &format!("clone:{}", repo.key),
            format!("clone {} {}", repo.key, repo.path),
        )?;
        fs::create_dir_all(dest)?;
        Ok(())
    }

    fn select_target(&self, _ctx: &ExecCtx, _root: &Path, combo: &str) -> Result<()> {
        self.record("lunch", format!("lunch {combo}"))
    }

    fn clean(&self, _ctx: &ExecCtx, _root: &Path, _combo: &str) -> Result<()> {
        self.record("installclean", "installclean".into())
    }

    fn compile(
        &self,
        _ctx: &ExecCtx,
        root: &Path,
        combo: &str,
        target: &str,
        jobs: usize,
    ) -> Result<()> {
        self.record("m", format!("m {target} -j{jobs}"))?;
        if let Some(name) = &self.artifact {
            let out = root
                .join("out/target/product")
                .join(codename_of(combo));
            fs::create_dir_all(&out)?;
            fs::write(out.join(name), b"zip")?;
        }
        Ok(())
    }
}

pub const PIXEL7: &str = r#"{
  "device": {"codename": "pixel7", "full_name": "Pixel 7", "manufacturer": "google"},
  "build": {"variant": "userdebug"},
  "repositories": {
    "device_tree": {"url": "https://example.com/device_google_pixel7.git", "branch": "lineage-21", "path": "device/google/pixel7"},
    "vendor": {"url": null, "branch": "lineage-21", "path": "vendor/google/pixel7", "optional": true}
  }
}"#;

pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub tools: Arc<FakeTools>,
}

impl Harness {
    pub fn new(tools: FakeTools) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(tmp.path().join("devices")).expect("mkdir devices");
        Self {
            tmp,
            tools: Arc::new(tools),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.tmp.path().join("android")
    }

    pub fn write_device(&self, name: &str, json: &str) -> PathBuf {
        let path = self.tmp.path().join("devices").join(format!("{name}.json"));
        fs::write(&path, json).expect("write descriptor");
        path
    }

    pub fn request(&self, name: &str, variant: Option<Variant>, run: RunConfig) -> BuildRequest {
        let config_dir = self.tmp.path().join("devices");
        let device = config::load_device(name, &config_dir, variant).expect("load device");
        BuildRequest::new(
            device,
            RunConfig {
                build_root: self.root(),
                config_dir,
                jobs: 4,
                ..run
            },
        )
    }

    pub fn run(&self, req: &BuildRequest, answers: &[bool]) -> (Result<Outcome>, Vec<ExecEvent>) {
        let (tx, rx) = mpsc::channel();
        let prompt = Arc::new(ScriptedPrompt::new(answers.iter().copied()));
        let mut ctx = ExecCtx::new(
            req.run.dry_run,
            Arc::new(ChannelSink::new(tx)),
            self.tools.clone(),
            prompt,
        );
        let res = pipeline::run(req, &mut ctx);
        drop(ctx);
        (res, rx.try_iter().collect())
    }
}

pub fn started_stages(events: &[ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecEvent::StageStarted { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect()
}

pub fn log_lines(events: &[ExecEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            ExecEvent::StageLog { line, .. } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

pub fn executor_done(events: &[ExecEvent]) -> Option<(bool, Option<String>)> {
    events.iter().find_map(|e| match e {
        ExecEvent::ExecutorDone { ok, error, .. } => Some((*ok, error.clone())),
        _ => None,
    })
}
