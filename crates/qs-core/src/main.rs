//! Quiet Session CLI
//!
//! - `run`: hold a quiet session and profile CPU until it expires or is
//!   interrupted
//! - `report`: render a persisted session table
//! - `classify`, `config`, `version`: inspection helpers

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use qs_common::{
    classify, evaluate_flag, Error, OutputFormat, ProcessPerformanceSummary, SessionId,
    SCHEMA_VERSION,
};
use qs_core::config::{load_config, ConfigOptions, QuietConfig, ResolvedConfig, StartOverrides};
use qs_core::exit_codes::ExitCode;
use qs_core::logging::{init_logging, LogConfig, LogLevel};
use qs_core::report::{self, SortKey};
use qs_core::{SessionDeps, SessionManager, SessionSettings};
use tracing::warn;

/// Quiet Session - suppress background activity and profile per-process CPU
#[derive(Parser)]
#[command(name = "qs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Config file (default: $QS_CONFIG, then the XDG config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "md")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a quiet session and wait for it to end
    Run(RunArgs),

    /// Render the persisted table of the last session
    Report(ReportArgs),

    /// Show the category of a process name
    Classify(ClassifyArgs),

    /// Print the effective configuration
    Config,

    /// Print version information
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Session length in seconds (overrides config)
    #[arg(long)]
    duration: Option<u64>,

    /// Sampling period in milliseconds (overrides config)
    #[arg(long)]
    period_ms: Option<u64>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Summary file (default: configured summary path)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Case-insensitive substring over name and category
    #[arg(long)]
    filter: Option<String>,

    /// Sort order
    #[arg(long, value_enum, default_value_t = SortKey::Pid)]
    sort: SortKey,

    /// Only show flagged processes
    #[arg(long)]
    flagged_only: bool,

    /// Also export the table as CSV to this path
    #[arg(long)]
    csv: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ClassifyArgs {
    /// Process image name, e.g. svchost.exe or sshd
    name: String,

    /// Process id (pid 4 is always System)
    #[arg(long)]
    pid: Option<u32>,
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_stop_signal(_signal: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

fn install_signal_handlers() {
    #[cfg(unix)]
    {
        let handler = on_stop_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        // SAFETY: the handler only stores to an atomic.
        unsafe {
            libc::signal(libc::SIGINT, handler);
            libc::signal(libc::SIGTERM, handler);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, None));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_session(&cli.global, args),
        Commands::Report(args) => run_report(&cli.global, args),
        Commands::Classify(args) => run_classify(&cli.global, args),
        Commands::Config => run_config(&cli.global),
        Commands::Version => {
            print_version(&cli.global);
            ExitCode::Clean
        }
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Helpers
// ============================================================================

fn print_error(global: &GlobalOpts, err: &Error) -> ExitCode {
    let code = ExitCode::from(err);
    match global.format {
        OutputFormat::Json => {
            let mut value = err.to_json();
            value["exit_code"] = serde_json::json!(code.as_i32());
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| err.to_string())
            );
        }
        OutputFormat::Summary => eprintln!("error: {err}"),
        OutputFormat::Md => eprintln!("{}", err.format_human()),
    }
    code
}

fn load(global: &GlobalOpts) -> Result<ResolvedConfig, ExitCode> {
    let options = ConfigOptions {
        config_path: global.config.clone(),
    };
    load_config(&options).map_err(|e| print_error(global, &Error::from(e)))
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(err) => eprintln!("error: {err}"),
    }
}

fn render_table(global: &GlobalOpts, summaries: &[ProcessPerformanceSummary], config: &QuietConfig) {
    match global.format {
        OutputFormat::Json => print_json(&report::render_json(
            summaries,
            &config.flags,
            &config.report.system_directory,
        )),
        OutputFormat::Summary => println!("{}", report::render_summary_line(summaries, &config.flags)),
        OutputFormat::Md => {
            print!("{}", report::render_markdown(summaries, &config.flags));
            println!();
            println!("{}", report::render_summary_line(summaries, &config.flags));
        }
    }
}

fn force_policy_off(deps: &SessionDeps) {
    if let Err(err) = deps.policy.disable() {
        warn!(policy = deps.policy.name(), error = %err, "could not reset quiet mode");
    }
}

// ============================================================================
// Commands
// ============================================================================

fn run_session(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let mut config = match load(global) {
        Ok(resolved) => resolved.config,
        Err(code) => return code,
    };
    if let Some(duration) = args.duration {
        if duration == 0 {
            return print_error(global, &Error::InvalidArgument("--duration must be positive".into()));
        }
        config.session.duration_secs = duration;
    }
    if let Some(period_ms) = args.period_ms {
        if period_ms == 0 {
            return print_error(global, &Error::InvalidArgument("--period-ms must be positive".into()));
        }
        config.sampler.period_ms = period_ms;
    }

    let deps = match SessionDeps::from_config(&config) {
        Ok(deps) => deps,
        Err(err) => return print_error(global, &err),
    };
    // A previous run may have died with quiet mode still on.
    force_policy_off(&deps);

    let settings = SessionSettings::from_config(&config);
    if !SessionManager::init_global(SessionManager::new(deps.clone(), settings)) {
        return print_error(global, &Error::SessionStartFailed("session manager already initialized".into()));
    }
    let manager = match SessionManager::global() {
        Ok(manager) => manager,
        Err(err) => return print_error(global, &err),
    };

    install_signal_handlers();
    let overrides =
        StartOverrides::from_env().with_duration(args.duration.map(Duration::from_secs));
    let time_left = match manager.start_with(overrides) {
        Ok(left) => left,
        Err(err) => {
            force_policy_off(&deps);
            return print_error(global, &err);
        }
    };
    let session_id = manager
        .current()
        .map(|s| s.id().clone())
        .unwrap_or_else(SessionId::new);

    match global.format {
        OutputFormat::Json => {}
        OutputFormat::Summary => eprintln!("[{session_id}] started, {}s left", time_left.as_secs()),
        OutputFormat::Md => {
            eprintln!("# Quiet session {session_id}");
            eprintln!();
            eprintln!("Running for {}s. Press Ctrl-C to stop early.", time_left.as_secs());
        }
    }

    let mut interrupted = false;
    loop {
        if STOP_REQUESTED.swap(false, Ordering::SeqCst) && manager.is_active() {
            interrupted = manager.stop().is_ok();
        }
        if deps.lifetime.wait_until_released(Duration::from_millis(200)) {
            break;
        }
    }

    let summaries = match manager.performance_table() {
        Ok(summaries) => summaries,
        Err(err) => {
            force_policy_off(&deps);
            return print_error(global, &err);
        }
    };
    render_table(global, &summaries, &config);
    force_policy_off(&deps);

    if interrupted {
        ExitCode::Interrupted
    } else if summaries.iter().any(|s| evaluate_flag(s, &config.flags).is_some()) {
        ExitCode::Flagged
    } else {
        ExitCode::Clean
    }
}

fn write_csv_file(path: &Path, summaries: &[ProcessPerformanceSummary]) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    report::write_csv(&mut out, summaries)?;
    out.flush()
}

fn run_report(global: &GlobalOpts, args: &ReportArgs) -> ExitCode {
    let config = match load(global) {
        Ok(resolved) => resolved.config,
        Err(code) => return code,
    };
    let path = args.file.clone().unwrap_or_else(|| config.summary_path());
    let summaries = match qs_telemetry::read_summaries(&path) {
        Ok(summaries) => summaries,
        Err(err) => return print_error(global, &Error::from(err)),
    };

    let mut rows = report::filter_summaries(&summaries, args.filter.as_deref().unwrap_or(""));
    if args.flagged_only {
        rows.retain(|s| evaluate_flag(s, &config.flags).is_some());
    }
    report::sort_summaries(&mut rows, args.sort);

    if let Some(csv) = &args.csv {
        if let Err(err) = write_csv_file(csv, &rows) {
            return print_error(global, &Error::Io(err));
        }
    }
    render_table(global, &rows, &config);
    ExitCode::Clean
}

fn run_classify(global: &GlobalOpts, args: &ClassifyArgs) -> ExitCode {
    let pid = args.pid.unwrap_or(0);
    let category = classify(pid, &args.name);
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "name": args.name,
            "pid": args.pid,
            "category": category,
        })),
        OutputFormat::Summary => println!("{category}"),
        OutputFormat::Md => println!("{}: {}", args.name, category),
    }
    ExitCode::Clean
}

fn run_config(global: &GlobalOpts) -> ExitCode {
    let resolved = match load(global) {
        Ok(resolved) => resolved,
        Err(code) => return code,
    };
    let path = resolved
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(built-in defaults)".to_string());
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "source": resolved.source,
            "path": resolved.path,
            "config": resolved.config,
        })),
        OutputFormat::Summary => println!("config: {path}"),
        OutputFormat::Md => {
            println!("# Effective configuration ({path})");
            println!();
            print!("{}", resolved.config.to_toml_string());
        }
    }
    ExitCode::Clean
}

fn print_version(global: &GlobalOpts) {
    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "schema_version": SCHEMA_VERSION,
            "qs_version": env!("CARGO_PKG_VERSION"),
            "rust_version": env!("CARGO_PKG_RUST_VERSION"),
        })),
        _ => {
            println!("qs {}", env!("CARGO_PKG_VERSION"));
            println!("schema version: {SCHEMA_VERSION}");
        }
    }
}
