//! ui-verify CLI.
//!
//! Runs a verification plan against the frontend at `UI_VERIFY_BASE_URL`
//! and writes screenshots plus `report.json` to `UI_VERIFY_OUTPUT_DIR`.
//!
//! Usage examples:
//!   Built-in plan:
//!     $ cargo run --bin ui-verify -- run home-theme
//!   Plan file, visible browser, JSON report on stdout:
//!     $ UI_VERIFY_CHROME_BIN=/path/to/chrome \
//!       cargo run --bin ui-verify -- run plans/mobile.json --show-browser --json

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use log::info;
use ui_verify::config::{HarnessConfig, Verbosity};
use ui_verify::harness::{RunError, run_plan};
use ui_verify::logging::HarnessLogger;
use ui_verify::plans;
use ui_verify::report::RunReport;
use ui_verify::runtime::ChromiumoxideRuntime;
use ui_verify::step::VerificationPlan;

#[derive(Parser)]
#[command(
    name = "ui-verify",
    author,
    version,
    about = "Scripted visual verification for a running web frontend"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a built-in plan or a plan file.
    Run(RunArgs),
    /// List built-in plans.
    List,
    /// Print a plan as JSON.
    Show {
        /// Built-in plan name or path to a plan file.
        plan: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Built-in plan name or path to a plan file.
    plan: String,

    /// Override the application base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Override the output directory for screenshots and the report.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Show the launched browser window.
    #[arg(long)]
    show_browser: bool,

    /// Print the final report as JSON instead of a text summary.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args, cli.verbose).await?,
        Command::List => {
            for plan in plans::all() {
                println!("{:<18} {}", plan.name, plan.description);
            }
        }
        Command::Show { plan } => {
            let plan = load_plan(&plan)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("failed to serialize plan")?
            );
        }
    }

    Ok(())
}

async fn run(args: RunArgs, verbose: u8) -> Result<()> {
    let plan = load_plan(&args.plan)?;

    let mut config = HarnessConfig::from_env().context("invalid UI_VERIFY_* configuration")?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    if let Some(output_dir) = args.output_dir {
        config.output_dir = output_dir;
    }
    if args.show_browser {
        config.headless = false;
    }
    if verbose > 0 {
        config.verbose = verbosity_from_count(verbose);
    }

    info!(
        "Running plan '{}' ({} steps) against {}",
        plan.name,
        plan.steps.len(),
        config.base_url
    );

    let logger = HarnessLogger::new(config.verbose);
    let runtime = Arc::new(ChromiumoxideRuntime::new());

    match run_plan(runtime, &plan, &config, &logger).await {
        Ok(report) => {
            print_report(&report, args.json)?;
            Ok(())
        }
        Err(err) => {
            if let Some(report) = err.report() {
                print_report(report, args.json)?;
            }
            Err(fatal(err)).with_context(|| format!("plan '{}' did not complete", plan.name))
        }
    }
}

fn fatal(err: RunError) -> anyhow::Error {
    match err {
        RunError::Launch(_) => anyhow!(err).context(
            "could not start Chromium; set UI_VERIFY_CHROME_BIN to a Chrome/Chromium executable",
        ),
        RunError::Unreachable { .. } => {
            anyhow!(err).context("is the dev server running? set UI_VERIFY_BASE_URL to override")
        }
        other => anyhow!(other),
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to serialize report")?
        );
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn load_plan(reference: &str) -> Result<VerificationPlan> {
    if let Some(plan) = plans::builtin(reference) {
        return Ok(plan);
    }
    let path = Path::new(reference);
    if !path.exists() {
        let known: Vec<_> = plans::names().collect();
        return Err(anyhow!(
            "'{reference}' is neither a built-in plan ({}) nor a file",
            known.join(", ")
        ));
    }
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    VerificationPlan::from_json(&source).with_context(|| format!("invalid plan {}", path.display()))
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
