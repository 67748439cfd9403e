//! SPMI - systemctl-like control of shell commands run through screen,
//! slurm or detached local sessions.
//!
//! Results go to stdout, logs to stderr. Exit status: 0 when every target
//! succeeded, 1 when any target or descriptor failed, 2 on fatal errors
//! (unusable metadata root, invalid pattern).

mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spmi_core::wrapper::supervisor;
use spmi_core::{descriptor, AppConfig, BulkReport, Registry, SpmiConfig, SpmiError, StdinMode};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "spmi", version)]
#[command(about = "Manage shell commands running in screen, slurm or local sessions")]
struct Args {
    /// Metadata root (defaults to $SPMI_HOME, then ~/.spmi)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Print results as JSON (list, status and bulk commands)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tracked resources
    List,
    /// Load descriptor files, or every descriptor under a directory
    Load {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Start matching resources
    Start {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Stop matching resources gracefully
    Stop {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Kill matching resources
    Kill {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Kill matching resources if active, then start them
    Restart {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Remove inactive matching resources
    Clean {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Show the status of matching resources
    Status {
        #[arg(required = true)]
        patterns: Vec<String>,
    },
    /// Forward stdin, line by line, to a running resource
    Connect { id: String },
    /// Supervise a resource's command inside its session
    #[command(hide = true)]
    Wrap {
        entry: PathBuf,
        #[arg(long, default_value = "fifo")]
        stdin: String,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_logging(debug: bool) {
    let log_level = if debug { Level::DEBUG } else { Level::INFO };
    let filter = std::env::var(AppConfig::LOG_ENV)
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(log_level.as_str()));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();
}

fn run(args: Args) -> Result<ExitCode> {
    // The supervisor runs inside a session and never touches the registry
    let command = match args.command {
        Command::Wrap { entry, stdin } => return wrap(&entry, &stdin),
        command => command,
    };

    let config = SpmiConfig::from_env(args.root)?;
    debug!("Metadata root: {}", config.root.display());
    let mut registry = Registry::open(config)
        .context("Metadata root is not usable")?;

    let json = args.json;
    let success = match command {
        Command::List => {
            let rows = registry.list();
            if json {
                print_json(&serde_json::to_value(&rows)?)?;
            } else {
                print(&render::list_table(&rows))?;
            }
            true
        }
        Command::Load { paths } => load(&mut registry, &paths)?,
        Command::Start { patterns } => bulk(&registry, "start", &patterns, json, |t| t.start())?,
        Command::Stop { patterns } => bulk(&registry, "stop", &patterns, json, |t| t.stop())?,
        Command::Kill { patterns } => bulk(&registry, "kill", &patterns, json, |t| t.kill())?,
        Command::Restart { patterns } => {
            bulk(&registry, "restart", &patterns, json, |t| t.restart())?
        }
        Command::Clean { patterns } => {
            let report = registry.clean(&patterns)?;
            print_report("clean", &report, json)?;
            report.is_success()
        }
        Command::Status { patterns } => status(&registry, &patterns, json)?,
        Command::Connect { id } => connect(&registry, &id)?,
        Command::Wrap { entry, stdin } => return wrap(&entry, &stdin),
    };

    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn wrap(entry: &Path, stdin: &str) -> Result<ExitCode> {
    let mode: StdinMode = stdin.parse()?;
    let code = supervisor::run(entry, mode)?;
    Ok(ExitCode::from(wait_status_byte(code)))
}

/// Load every descriptor independently; a bad file fails only itself.
fn load(registry: &mut Registry, paths: &[PathBuf]) -> Result<bool> {
    let mut failed = 0;
    let files = descriptor::collect_descriptor_paths(paths);

    for path in &files {
        let loaded = descriptor::parse_file(path).and_then(|record| {
            registry.load(record).map(|task| task.id().to_string())
        });

        match loaded {
            Ok(id) => print(&format!("load {}: ok\n", id))?,
            Err(e) => {
                failed += 1;
                print(&format!(
                    "load {}: failed ({}): {}\n",
                    path.display(),
                    e.kind(),
                    e
                ))?;
            }
        }
    }

    print(&format!(
        "load: {} succeeded, {} failed\n",
        files.len() - failed,
        failed
    ))?;
    Ok(failed == 0)
}

fn bulk(
    registry: &Registry,
    action: &str,
    patterns: &[String],
    json: bool,
    op: impl FnMut(&spmi_core::Manageable) -> spmi_core::Result<()>,
) -> Result<bool> {
    let report = registry.apply(patterns, op)?;
    print_report(action, &report, json)?;
    Ok(report.is_success())
}

fn print_report(action: &str, report: &BulkReport<()>, json: bool) -> Result<()> {
    if json {
        print_json(&render::report_json(action, report))
    } else {
        print(&render::report(action, report))
    }
}

fn status(registry: &Registry, patterns: &[String], json: bool) -> Result<bool> {
    let report = registry.apply(patterns, |task| task.status())?;
    if json {
        print_json(&render::status_json(&report))?;
        return Ok(report.is_success());
    }

    let mut out = String::new();
    for outcome in &report.outcomes {
        match &outcome.result {
            Ok(status) => out.push_str(&render::status_block(status)),
            Err(e) => out.push_str(&format!("{}: failed ({}): {}\n", outcome.id, e.kind(), e)),
        }
        out.push('\n');
    }
    for pattern in &report.unmatched {
        out.push_str(&format!("no resource matches '{}'\n", pattern));
    }
    print(&out)?;

    Ok(report.is_success())
}

fn connect(registry: &Registry, id: &str) -> Result<bool> {
    let task = match registry.get(id) {
        Ok(task) => task,
        Err(e @ SpmiError::NotFound { .. }) => {
            print(&format!("connect {}: failed ({}): {}\n", id, e.kind(), e))?;
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if let Err(e) = task.connect(&line) {
            print(&format!("connect {}: failed ({}): {}\n", id, e.kind(), e))?;
            return Ok(false);
        }
    }
    Ok(true)
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    print(&format!("{}\n", serde_json::to_string_pretty(value)?))
}

fn print(text: &str) -> Result<()> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Shell-style status byte: the code itself, or 128 + signal.
fn wait_status_byte(code: i32) -> u8 {
    if code >= 0 {
        (code & 0xff) as u8
    } else {
        (128 + code.unsigned_abs().min(127)) as u8
    }
}
