use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::fmt::Write as _;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Instant;

use crate::config::BuildRequest;
use crate::error::{Error, Result};
use crate::log_sanitize::sanitize_log_line;
use crate::planner::Plan;
use crate::prompt::Prompt;
use crate::tools::ToolAdapter;
use crate::workspace::BuildRootPaths;

pub type StageExecFn = fn(&BuildRequest, &mut ExecCtx) -> Result<()>;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    /// Free-form text for the user, outside of any stage.
    Notice {
        text: String,
    },
    StageStarted {
        id: String,
        label: String,
    },
    StageLog {
        id: String,
        line: String,
    },
    StageFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
        elapsed_secs: u64,
        artifact: Option<PathBuf>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

#[derive(Default)]
pub struct StdoutSink {
    state: Mutex<StdoutSinkState>,
}

#[derive(Default)]
struct StdoutSinkState {
    logs_root: Option<PathBuf>,
    run_log_dir: Option<PathBuf>,
    passed: usize,
    failed: Vec<String>,
    // Recent output per stage, dumped to disk if the stage fails.
    tails: BTreeMap<String, VecDeque<String>>,
    written_logs: Vec<PathBuf>,
}

impl StdoutSink {
    /// Failed stages get their captured output written under `logs_root/<timestamp>/`.
    pub fn with_error_logs(logs_root: PathBuf) -> Self {
        Self {
            state: Mutex::new(StdoutSinkState {
                logs_root: Some(logs_root),
                ..StdoutSinkState::default()
            }),
        }
    }
}

impl ExecSink for StdoutSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::Notice { text } => {
                print!("{text}");
                if !text.ends_with('\n') {
                    println!();
                }
            }
            ExecEvent::StageStarted { id, label } => {
                println!("RUN: {id} ({label})");
            }
            ExecEvent::StageLog { id, line } => {
                if let Ok(mut s) = self.state.lock() {
                    remember_line(&mut s.tails, &id, &line);
                }
                println!("[{id}] {line}");
            }
            ExecEvent::StageFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                let mut written = None;
                if let Ok(mut s) = self.state.lock() {
                    if ok {
                        s.passed += 1;
                        s.tails.remove(&id);
                    } else {
                        s.failed.push(id.clone());
                        if s.logs_root.is_some() {
                            match dump_failed_stage(&mut s, &id, error.as_deref(), elapsed_ms) {
                                Ok(path) => written = path,
                                Err(e) => println!("WARN: no error log for {id}: {e}"),
                            }
                        }
                    }
                }
                match (ok, error) {
                    (true, _) => println!("DONE: {id} ({elapsed_ms}ms)"),
                    (false, e) => println!("FAIL: {id} ({elapsed_ms}ms) {}", e.unwrap_or_default()),
                }
                if let Some(path) = written {
                    println!("  log: {}", path.display());
                }
            }
            ExecEvent::ExecutorDone {
                ok,
                error,
                elapsed_secs,
                artifact,
            } => {
                let mut out = String::from("SUMMARY:\n");
                let _ = writeln!(out, "  result:  {}", if ok { "success" } else { "failed" });
                if let Ok(mut s) = self.state.lock() {
                    let _ = writeln!(out, "  stages:  {} passed, {} failed", s.passed, s.failed.len());
                    if !s.failed.is_empty() {
                        let _ = writeln!(out, "  failed:  {}", s.failed.join(", "));
                    }
                    for p in &s.written_logs {
                        let _ = writeln!(out, "  log:     {}", p.display());
                    }
                    // Next run starts from a clean slate but keeps the logs location.
                    let logs_root = s.logs_root.take();
                    *s = StdoutSinkState {
                        logs_root,
                        ..StdoutSinkState::default()
                    };
                }
                let _ = writeln!(out, "  elapsed: {}", format_elapsed(elapsed_secs));
                if let Some(a) = artifact {
                    let _ = writeln!(out, "  output:  {}", a.display());
                }
                if let Some(e) = error.filter(|_| !ok) {
                    let _ = writeln!(out, "  error:   {e}");
                }
                print!("{out}");
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub tools: Arc<dyn ToolAdapter>,
    pub prompt: Arc<dyn Prompt>,
    pub current_stage: Option<String>,
    paths: Option<BuildRootPaths>,
    artifact: Option<PathBuf>,
}

impl ExecCtx {
    pub fn new(
        dry_run: bool,
        sink: Arc<dyn ExecSink>,
        tools: Arc<dyn ToolAdapter>,
        prompt: Arc<dyn Prompt>,
    ) -> Self {
        Self {
            dry_run,
            sink,
            tools,
            prompt,
            current_stage: None,
            paths: None,
            artifact: None,
        }
    }

    pub fn set_stage(&mut self, id: impl Into<String>) {
        self.current_stage = Some(id.into());
    }

    pub fn set_paths(&mut self, paths: BuildRootPaths) {
        self.paths = Some(paths);
    }

    // Paths recorded by core.setup, or computed (without creating anything) before it ran.
    pub fn build_root(&self, req: &BuildRequest) -> Result<BuildRootPaths> {
        if let Some(p) = self.paths.as_ref() {
            return Ok(p.clone());
        }
        crate::workspace::load_paths(&req.run.build_root)
    }

    pub fn set_artifact(&mut self, artifact: Option<PathBuf>) {
        self.artifact = artifact;
    }

    pub fn artifact(&self) -> Option<&PathBuf> {
        self.artifact.as_ref()
    }

    pub fn notice(&self, text: impl Into<String>) {
        self.sink.emit(ExecEvent::Notice { text: text.into() });
    }

    pub fn log(&self, msg: &str) {
        let id = self
            .current_stage
            .clone()
            .unwrap_or_else(|| "<none>".into());
        self.sink.emit(ExecEvent::StageLog {
            id,
            line: msg.to_string(),
        });
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(stage = self.current_stage.as_deref().unwrap_or("<none>"), "{msg}");
        self.log(&format!("WARN: {msg}"));
    }

    pub fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        self.prompt.confirm(question, default)
    }

    /// Runs a command to completion, streaming its output into the sink line by line.
    /// The child stays in our process group so an interrupt reaches it too.
    pub fn run_cmd(&self, mut cmd: Command) -> Result<()> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        if self.dry_run {
            self.log(&format!("DRY-RUN: {:?}", cmd));
            return Ok(());
        }
        tracing::debug!(?cmd, "spawning");

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::tool(format!("failed to start {program}: {e}")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = stdout {
            let tx = tx.clone();
            std::thread::spawn(move || pump_lines(out, tx));
        }
        if let Some(err) = stderr {
            let tx = tx.clone();
            std::thread::spawn(move || pump_lines(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_log_line(&line);
            if line.is_empty() {
                continue;
            }
            self.log(&line);
        }

        let status = child
            .wait()
            .map_err(|e| Error::tool(format!("wait for {program} failed: {e}")))?;
        tracing::debug!(%program, %status, "finished");
        if !status.success() {
            return Err(Error::tool(format!("{program} failed: {status}")));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct StageRegistry {
    exec: BTreeMap<&'static str, StageExecFn>,
}

impl StageRegistry {
    pub fn add(&mut self, id: &'static str, f: StageExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate stage executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<StageExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_stages(reg: &mut StageRegistry) -> Result<()>;
}

pub fn builtin_registry() -> Result<StageRegistry> {
    let mut reg = StageRegistry::default();
    crate::modules::core::CoreModule::register_stages(&mut reg)?;
    crate::modules::sync::SyncModule::register_stages(&mut reg)?;
    crate::modules::repos::ReposModule::register_stages(&mut reg)?;
    crate::modules::build::BuildModule::register_stages(&mut reg)?;
    Ok(reg)
}

/// Runs the plan's stages one after another. The first failing stage stops the run;
/// nothing that already happened is undone.
pub fn execute_plan(
    req: &BuildRequest,
    plan: &Plan,
    reg: &StageRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    let ordered = plan.ordered()?;
    // Resolve every executor up front so a wiring mistake cannot surface mid-build.
    let mut stages = Vec::with_capacity(ordered.len());
    for stage in ordered {
        let Some(exec) = reg.get(&stage.id) else {
            return Err(Error::msg(format!(
                "no executor registered for stage '{}'",
                stage.id
            )));
        };
        stages.push((stage, exec));
    }

    for (stage, exec) in stages {
        ctx.sink.emit(ExecEvent::StageStarted {
            id: stage.id.clone(),
            label: stage.label.clone(),
        });
        ctx.set_stage(stage.id.clone());
        let start = Instant::now();
        let res = exec(req, ctx);
        let elapsed_ms = start.elapsed().as_millis();
        match res {
            Ok(()) => ctx.sink.emit(ExecEvent::StageFinished {
                id: stage.id.clone(),
                ok: true,
                error: None,
                elapsed_ms,
            }),
            Err(e) => {
                ctx.sink.emit(ExecEvent::StageFinished {
                    id: stage.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
                return Err(e.context(format!("stage '{}' failed", stage.id)));
            }
        }
    }
    Ok(())
}

/// `3725` -> `1h 2m 5s`
pub fn format_elapsed(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

fn pump_lines<R: Read>(reader: R, tx: mpsc::Sender<String>) {
    for chunk in BufReader::new(reader).split(b'\n') {
        let Ok(chunk) = chunk else { break };
        // `repo sync` redraws its progress line with '\r'; only the last frame matters.
        let Some(frame) = chunk.rsplit(|b| *b == b'\r').find(|f| !f.is_empty()) else {
            continue;
        };
        if tx.send(String::from_utf8_lossy(frame).into_owned()).is_err() {
            break;
        }
    }
}

fn remember_line(tails: &mut BTreeMap<String, VecDeque<String>>, stage_id: &str, line: &str) {
    const KEEP: usize = 4000;
    let tail = tails.entry(stage_id.to_string()).or_default();
    if tail.len() == KEEP {
        tail.pop_front();
    }
    tail.push_back(sanitize_log_line(line));
}

fn dump_failed_stage(
    state: &mut StdoutSinkState,
    stage_id: &str,
    error: Option<&str>,
    elapsed_ms: u128,
) -> Result<Option<PathBuf>> {
    let dir = match state.run_log_dir.clone() {
        Some(dir) => dir,
        None => {
            let root = state
                .logs_root
                .as_ref()
                .ok_or_else(|| Error::msg("no logs directory configured"))?;
            // Logs live inside the build root; a stage failing before setup must not create it.
            if !root.parent().is_some_and(Path::is_dir) {
                return Ok(None);
            }
            let dir = root.join(chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
            fs::create_dir_all(&dir)
                .map_err(|e| Error::msg(format!("cannot create {}: {e}", dir.display())))?;
            state.run_log_dir = Some(dir.clone());
            dir
        }
    };
    let path = dir.join(format!("{}.log", log_file_stem(stage_id)));

    let mut body = format!("stage: {stage_id}\nelapsed: {elapsed_ms}ms\n");
    if let Some(e) = error.map(str::trim).filter(|e| !e.is_empty()) {
        let _ = writeln!(body, "error: {e}");
    }
    body.push_str("\n--- last output ---\n");
    for line in state.tails.get(stage_id).into_iter().flatten() {
        let _ = writeln!(body, "{line}");
    }

    fs::write(&path, body)
        .map_err(|e| Error::msg(format!("cannot write {}: {e}", path.display())))?;
    state.written_logs.push(path.clone());
    Ok(Some(path))
}

fn log_file_stem(stage_id: &str) -> String {
    let stem: String = stage_id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect();
    if stem.is_empty() { "stage".into() } else { stem }
}
