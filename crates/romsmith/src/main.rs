use clap::{CommandFactory, FromArgMatches, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use romsmith::config::run::DEFAULT_MIN_FREE_GB;
use romsmith::config::{self, BuildRequest, RunConfig, Variant};
use romsmith::executor::{ExecCtx, StdoutSink};
use romsmith::pipeline::{self, Outcome};
use romsmith::prompt::{FixedAnswer, Prompt, TerminalPrompt};
use romsmith::tools::SystemTools;
use romsmith::{Error, Result};

const CONFIG_DIR_ENV: &str = "ROMSMITH_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "devices";

/// Sync, assemble and build a ROM for one device.
#[derive(Debug, Parser)]
#[command(author, version, about, args_override_self = true)]
struct Args {
    /// Device codename (looked up in the config dir) or path to a descriptor file
    #[arg(short, long, value_name = "NAME|PATH")]
    device: Option<String>,
    /// Build variant; overrides the descriptor's build.variant
    #[arg(long, value_enum)]
    variant: Option<Variant>,
    /// Do not run repo sync (requires an existing sync in the build root)
    #[arg(long)]
    skip_sync: bool,
    /// Do not clone device repositories (requires the device tree to exist)
    #[arg(long)]
    skip_clone: bool,
    /// Run `m installclean` before building
    #[arg(long)]
    clean: bool,
    /// Remove the device repositories before cloning them again
    #[arg(long)]
    clean_repos: bool,
    /// Parallel jobs for repo sync and the build (0 = CPU count)
    #[arg(short, long, env = "ROMSMITH_JOBS")]
    jobs: Option<usize>,
    /// Directory that holds the synced source tree
    #[arg(long, env = "ROMSMITH_BUILD_ROOT", default_value = "android")]
    build_root: PathBuf,
    /// Directory with device descriptors (<codename>.json)
    #[arg(long, env = CONFIG_DIR_ENV, default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,
    /// Ask before continuing when less than this much disk space is free
    #[arg(long, default_value_t = DEFAULT_MIN_FREE_GB)]
    min_free_gb: u64,
    /// Answer yes to every confirmation
    #[arg(short = 'y', long)]
    yes: bool,
    /// Print external commands instead of running them
    #[arg(long)]
    dry_run: bool,
    /// Print the stage plan and exit
    #[arg(long)]
    print_plan: bool,
    /// Debug-level diagnostics on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let args = parse_args();
    init_tracing(args.verbose);

    match run(args) {
        Ok(code) => code,
        Err(e) if e.is_cancelled() => {
            println!("Cancelled: {e}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::debug!(kind = ?e.kind(), "fatal error");
            eprintln!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}

// `--help` lists the devices found in the config dir, so it has to be known
// before clap parses anything.
fn parse_args() -> Args {
    let config_dir = config_dir_hint(std::env::args().skip(1));
    let after_help = format!(
        "Available devices in {}:\n{}",
        config_dir.display(),
        device_list(&config_dir)
    );
    let matches = Args::command().after_help(after_help).get_matches();
    Args::from_arg_matches(&matches).unwrap_or_else(|e| e.exit())
}

fn config_dir_hint(mut args: impl Iterator<Item = String>) -> PathBuf {
    let mut found = None;
    while let Some(a) = args.next() {
        if a == "--config-dir" {
            found = args.next();
        } else if let Some(v) = a.strip_prefix("--config-dir=") {
            found = Some(v.to_string());
        }
    }
    found
        .or_else(|| std::env::var(CONFIG_DIR_ENV).ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR))
}

fn device_list(config_dir: &Path) -> String {
    let devices = config::list_devices(config_dir);
    if devices.is_empty() {
        return "  (none)".into();
    }
    devices
        .iter()
        .map(|d| format!("  {d}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn run(args: Args) -> Result<ExitCode> {
    let Some(device_ref) = args.device.as_deref() else {
        return Err(Error::config(format!(
            "no device specified (use --device <name|path>)\nAvailable devices in {}:\n{}",
            args.config_dir.display(),
            device_list(&args.config_dir)
        )));
    };

    let device = config::load_device(device_ref, &args.config_dir, args.variant)?;
    tracing::debug!(source = %device.source.display(), codename = %device.codename, "loaded device descriptor");

    let run = RunConfig {
        build_root: args.build_root,
        config_dir: args.config_dir,
        skip_sync: args.skip_sync,
        skip_clone: args.skip_clone,
        clean_repos: args.clean_repos,
        clean_first: args.clean,
        jobs: args
            .jobs
            .filter(|j| *j > 0)
            .unwrap_or_else(|| num_cpus::get().max(1)),
        min_free_gb: args.min_free_gb,
        assume_yes: args.yes,
        dry_run: args.dry_run,
    };
    let req = BuildRequest::new(device, run);

    if args.print_plan {
        let plan = romsmith::modules::plan_for(&req)?;
        for (i, stage) in plan.ordered()?.iter().enumerate() {
            println!(
                "{:>2}. {:<16} {:<8} {:<10} {}",
                i + 1,
                stage.id,
                stage.module,
                stage.phase,
                stage.label
            );
        }
        return Ok(ExitCode::SUCCESS);
    }

    let paths = romsmith::workspace::load_paths(&req.run.build_root)?;
    let sink = Arc::new(StdoutSink::with_error_logs(paths.logs_dir));
    let prompt: Arc<dyn Prompt> = if req.run.assume_yes {
        Arc::new(FixedAnswer(true))
    } else {
        Arc::new(TerminalPrompt)
    };
    let mut ctx = ExecCtx::new(req.run.dry_run, sink, Arc::new(SystemTools), prompt);

    match pipeline::run(&req, &mut ctx)? {
        Outcome::Declined => {}
        Outcome::Completed { elapsed, artifact } => {
            tracing::info!(
                elapsed_secs = elapsed.as_secs(),
                artifact = ?artifact,
                "build finished"
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
