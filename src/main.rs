//! cmi-updater - main entry point
//!
//! Detects the distribution, asks for the sudo password, then runs the update
//! pipeline on one worker thread while the main thread animates progress.

use anyhow::{Context, anyhow};
use std::io::{self, Write};
use std::process::ExitCode;
use std::sync::mpsc;
use std::thread;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cmi_updater::cli::{Cli, Commands};
use cmi_updater::catalog::{DistroProfile, Layout};
use cmi_updater::command_runner::{
    CancelToken, CommandRunner, DryRunRunner, ExecLimits, ShellRunner,
};
use cmi_updater::credential::Credential;
use cmi_updater::distro::{DistroDetector, OsReleaseDetector};
use cmi_updater::lock::RunLock;
use cmi_updater::orchestrator::{InstallContext, InstallOrchestrator};
use cmi_updater::pipeline::Pipeline;
use cmi_updater::process_guard::{self, ProcessGuard};
use cmi_updater::progress::ProgressIndicator;
use cmi_updater::report::InstallReport;
use cmi_updater::types::Category;
use cmi_updater::versions::check_versions;
use cmi_updater::ui::{CrosstermUi, TerminalUI};
use cmi_updater::{UpdaterConfig, catalog, sanity};

const TITLE: &str = "ClaudeMods Multi ISO Creator Updater";

/// Initialize the logger with appropriate settings
///
/// Logs go to stderr so they never collide with the progress line or a JSON
/// report on stdout. `RUST_LOG` overrides the default level.
fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

/// Main application entry point
fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logger(cli.verbose);
    debug!(?cli, "CLI arguments parsed");

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("✗ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let cancel = CancelToken::new();
    // Stops running commands if we receive SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers(cancel.clone()) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _process_guard = ProcessGuard::new();

    let config =
        UpdaterConfig::resolve(cli.config.as_deref()).context("Failed to load configuration")?;
    let layout = config.to_layout();
    let detector = OsReleaseDetector::default();

    match cli.command() {
        Commands::Detect => detect_command(cli, &detector),
        Commands::Plan => {
            let category = detector.detect();
            let pipeline = catalog::pipeline_for(category, &layout)?;
            print_plan(cli, &pipeline)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Versions => {
            let profile = catalog::require_profile(detector.detect())?;
            let runner = build_runner(cli, &config, sanity::is_running_as_root());
            let mut ui = CrosstermUi::stdout();
            let limits = command_limits(&config, &cancel);
            show_versions(cli, &mut ui, runner.as_ref(), profile, &layout, &limits)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Update {
            yes,
            launch,
            no_launch,
        } => {
            let options = UpdateOptions {
                yes,
                launch,
                no_launch,
            };
            update_command(cli, &config, detector, cancel, options)
        }
    }
}

fn detect_command(cli: &Cli, detector: &OsReleaseDetector) -> anyhow::Result<ExitCode> {
    let category = detector.detect();
    if cli.json {
        let value = serde_json::json!({
            "category": category,
            "label": category.label(),
            "supported": category.is_known(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{} ({})", category, category.label());
    }
    Ok(if category.is_known() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_plan(cli: &Cli, pipeline: &Pipeline) -> anyhow::Result<()> {
    if cli.json {
        println!("{}", serde_json::to_string_pretty(pipeline)?);
        return Ok(());
    }

    for (i, step) in pipeline.steps().iter().enumerate() {
        let mut flags = Vec::new();
        if step.privileged {
            flags.push("privileged");
        }
        if !step.critical {
            flags.push("non-critical");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{:>2}. {}{}", i + 1, step.name, flags);
        println!("      {}", step.command);
    }
    Ok(())
}

/// Unprivileged limits for commands run outside the pipeline
fn command_limits(config: &UpdaterConfig, cancel: &CancelToken) -> ExecLimits {
    let limits = ExecLimits::unbounded().with_cancel(cancel.clone());
    match config.step_timeout() {
        Some(timeout) => limits.with_timeout(timeout),
        None => limits,
    }
}

fn build_runner(cli: &Cli, config: &UpdaterConfig, is_root: bool) -> Box<dyn CommandRunner> {
    if cli.dry_run {
        return Box::new(DryRunRunner);
    }
    // Already root: privileged steps run without a prefix
    let elevation = if is_root {
        Vec::new()
    } else {
        config.elevation.clone()
    };
    Box::new(ShellRunner::new().with_elevation(elevation))
}

fn show_versions(
    cli: &Cli,
    ui: &mut dyn TerminalUI,
    runner: &dyn CommandRunner,
    profile: &DistroProfile,
    layout: &Layout,
    limits: &ExecLimits,
) -> anyhow::Result<()> {
    if !cli.json {
        ui.message("Checking for updates...")?;
    }
    let summary = check_versions(runner, profile, layout, limits);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    ui.message(&format!("Current version: {}", summary.current))?;
    ui.message(&format!("Available version: {}", summary.available))?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct UpdateOptions {
    yes: bool,
    launch: bool,
    no_launch: bool,
}

type Updater = InstallOrchestrator<Box<dyn CommandRunner>, OsReleaseDetector>;

fn update_command(
    cli: &Cli,
    config: &UpdaterConfig,
    detector: OsReleaseDetector,
    cancel: CancelToken,
    options: UpdateOptions,
) -> anyhow::Result<ExitCode> {
    let interactive = !options.yes && !cli.json;
    // Prompts move to stderr when stdout carries JSON
    let ui_out: Box<dyn Write> = if cli.json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };
    let mut ui = CrosstermUi::new(ui_out);
    if interactive {
        ui.banner(TITLE)?;
    }

    let is_root = sanity::is_running_as_root();
    let orchestrator = InstallOrchestrator::new(build_runner(cli, config, is_root), detector)
        .with_step_timeout(config.step_timeout())
        .dry_run(cli.dry_run);

    // Detected once: the pipeline and the report share this category
    let category = orchestrator.detect_environment();
    let layout = config.to_layout();
    let profile = catalog::require_profile(category)?;
    let pipeline = catalog::pipeline_for(category, &layout)?;
    info!(%category, steps = pipeline.len(), "update pipeline resolved");

    if !cli.dry_run {
        sanity::run_preflight_checks(category)?;
    }

    let _lock = if cli.dry_run {
        None
    } else {
        Some(RunLock::acquire(&config.lock_path)?)
    };

    if interactive {
        ui.message(&format!("Detected distribution: {}", category.label()))?;
        let limits = command_limits(config, &cancel);
        loop {
            let choice = ui.select(
                "What would you like to do?",
                &["Install / Update", "Show versions", "Exit"],
            )?;
            match choice {
                Some(0) => break,
                Some(1) => show_versions(
                    cli,
                    &mut ui,
                    orchestrator.runner().as_ref(),
                    profile,
                    &layout,
                    &limits,
                )?,
                _ => return Ok(ExitCode::SUCCESS),
            }
        }
    }

    let credential = if pipeline.needs_credential() && !cli.dry_run && !is_root {
        ui.read_secret("[sudo] password: ")?
    } else {
        Credential::empty()
    };

    let report = run_pipeline(cli, config, orchestrator, category, &pipeline, &credential, cancel)?;
    drop(credential);

    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        ui.show_report(&report)?;
    }

    if report.succeeded && !cli.dry_run && !options.no_launch {
        maybe_launch(&mut ui, profile, &layout, options, interactive)?;
    }

    Ok(if report.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// One worker thread runs the pipeline; the main thread animates progress
/// and then joins the worker.
fn run_pipeline(
    cli: &Cli,
    config: &UpdaterConfig,
    orchestrator: Updater,
    category: Category,
    pipeline: &Pipeline,
    credential: &Credential,
    cancel: CancelToken,
) -> anyhow::Result<InstallReport> {
    let (events_tx, events_rx) = mpsc::channel();
    let orchestrator = orchestrator.with_events(events_tx);

    let mut ctx = InstallContext::new(category).with_cancel(cancel);
    let finished = ctx.finished_flag();

    let progress_out: Box<dyn Write> = if cli.json {
        Box::new(io::stderr())
    } else {
        Box::new(io::stdout())
    };

    let outcome = thread::scope(|scope| {
        let ctx = &mut ctx;
        // The orchestrator moves in so its event sender drops with the worker
        let worker = scope.spawn(move || orchestrator.run(pipeline, credential, ctx));

        if let Err(e) = ProgressIndicator::new(progress_out, finished)
            .with_events(events_rx)
            .with_interval(config.progress_interval())
            .run()
        {
            debug!("progress output failed: {}", e);
        }

        worker.join()
    });

    outcome.map_err(|_| anyhow!("pipeline worker panicked"))
}

fn maybe_launch(
    ui: &mut dyn TerminalUI,
    profile: &DistroProfile,
    layout: &Layout,
    options: UpdateOptions,
    interactive: bool,
) -> anyhow::Result<()> {
    let executable = layout.executable_path(profile);

    let wanted = if options.launch {
        true
    } else if interactive {
        ui.confirm(&format!("Do you want to launch {} now?", profile.executable))?
    } else {
        false
    };
    if !wanted {
        return Ok(());
    }

    ui.message(&format!("Launching {}...", executable.display()))?;
    // Foreground child: stays in our process group so it owns the terminal
    let status = std::process::Command::new(&executable)
        .status()
        .with_context(|| format!("Failed to launch {}", executable.display()))?;
    info!(%status, "launched tool exited");
    Ok(())
}
