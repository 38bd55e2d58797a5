//! skillforge CLI - drive the terminal simulator and exercise checker.

mod claude;
mod reporter;
mod scenario;

use clap::{Parser, Subcommand, ValueEnum};
use claude::ClaudeCli;
use comfy_table::{Cell, Color, Table};
use reporter::{Reporter, ReporterConfig};
use scenario::{StepReport, load_scenario, replay};
use serde::Serialize;
use skillforge_core::persist::{PersistError, load_json, save_json};
use skillforge_core::{
    AttemptTracker, CommandResult, ConfigOverrides, Engine, EngineConfig, Exercise, Judge,
    OutputSynthesizer, SimulatorState, ValidationResult, apply_overrides, load_config,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing_subscriber::EnvFilter;

/// Exit codes for the CLI.
mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const NOT_PASSED: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
    pub const EXECUTION_ERROR: u8 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "skillforge")]
#[command(about = "Terminal simulator and exercise checker for SkillForge")]
#[command(version)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory containing skillforge.config.yaml (default: current directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Use the Claude CLI for unknown commands and semantic grading
    #[arg(long, global = true)]
    llm: bool,

    /// Model to use with --llm (overrides config)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Pass threshold between 0 and 1 (overrides config)
    #[arg(long, global = true)]
    threshold: Option<f64>,

    /// Start new sessions from an empty root instead of the workstation layout
    #[arg(long, global = true)]
    empty: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate one line of input
    Exec {
        /// The command line to simulate
        input: String,

        /// State file to resume from and save back to
        #[arg(long)]
        state: Option<PathBuf>,
    },
    /// Check an answer against an exercise file
    Check {
        /// Exercise YAML file
        exercise: PathBuf,

        /// The learner's answer
        answer: String,

        /// State file to resume from and save back to
        #[arg(long)]
        state: Option<PathBuf>,

        /// Attempt tracker file, enables the hint ladder across runs
        #[arg(long)]
        attempts: Option<PathBuf>,

        /// Session name for attempt tracking
        #[arg(long, default_value = "default")]
        session: String,
    },
    /// Replay a scenario file step by step
    Replay {
        /// Scenario YAML file
        scenario: PathBuf,

        /// Write the final state to this file
        #[arg(long)]
        save_state: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    run_command(&cli).await
}

/// Log to stderr, filtered by `SKILLFORGE_LOG` (default: warn).
fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("SKILLFORGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn iso8601_now() -> String {
    OffsetDateTime::now_utc()
        .format(&format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
        ))
        .unwrap_or_else(|_| "unknown".to_string())
}

fn build_engine(config: &EngineConfig, llm: bool) -> Engine {
    if !llm {
        return Engine::from_config(config);
    }
    let claude = Arc::new(ClaudeCli::new(&config.model));
    let synthesizer: Arc<dyn OutputSynthesizer> = claude.clone();
    let judge: Arc<dyn Judge> = claude;
    Engine::with_generative(config, Some(synthesizer), Some(judge))
}

fn resume_state(engine: &Engine, path: Option<&Path>) -> Result<SimulatorState, PersistError> {
    match path {
        Some(path) if path.exists() => load_json(path),
        _ => Ok(engine.initial_state()),
    }
}

fn to_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(exit_code::NOT_PASSED))
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
    );
}

async fn run_command(cli: &Cli) -> ExitCode {
    let reporter = Reporter::new(ReporterConfig {
        verbose: cli.verbose,
        color: !cli.no_color,
    });

    let config_dir = cli.config_dir.clone().unwrap_or_else(|| PathBuf::from("."));
    let config = match load_config(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            reporter.error(&format!("Failed to load config: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };
    let overrides = ConfigOverrides {
        model: cli.model.clone(),
        pass_threshold: cli.threshold,
        workstation: if cli.empty { Some(false) } else { None },
        ..ConfigOverrides::default()
    };
    let config = apply_overrides(config, &overrides);
    if let Err(e) = skillforge_core::config::validate_config(&config) {
        reporter.error(&format!("Invalid configuration: {e}"));
        return ExitCode::from(exit_code::CONFIG_ERROR);
    }

    let engine = build_engine(&config, cli.llm);

    match &cli.command {
        Commands::Exec { input, state } => {
            run_exec(cli, &reporter, &engine, input, state.as_deref()).await
        }
        Commands::Check {
            exercise,
            answer,
            state,
            attempts,
            session,
        } => {
            let paths = CheckPaths {
                exercise,
                state: state.as_deref(),
                attempts: attempts.as_deref(),
            };
            run_check(cli, &reporter, &engine, &paths, answer, session).await
        }
        Commands::Replay {
            scenario,
            save_state,
        } => run_replay(cli, &reporter, &engine, scenario, save_state.as_deref()).await,
    }
}

async fn run_exec(
    cli: &Cli,
    reporter: &Reporter,
    engine: &Engine,
    input: &str,
    state_path: Option<&Path>,
) -> ExitCode {
    let state = match resume_state(engine, state_path) {
        Ok(state) => state,
        Err(e) => {
            reporter.error(&format!("Failed to load state: {e}"));
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    };

    let (result, next) = engine.execute(input, &state).await;

    if let Some(path) = state_path {
        if let Err(e) = save_json(&next, path) {
            reporter.error(&format!("Failed to save state: {e}"));
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    }

    match cli.format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => reporter.command_output(&result),
    }
    to_exit_code(result.exit_code)
}

struct CheckPaths<'a> {
    exercise: &'a Path,
    state: Option<&'a Path>,
    attempts: Option<&'a Path>,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    timestamp: String,
    exercise: &'a str,
    result: &'a CommandResult,
    validation: &'a ValidationResult,
}

fn load_exercise(path: &Path) -> Result<Exercise, String> {
    let content =
        std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    let exercise: Exercise =
        serde_yml::from_str(&content).map_err(|e| format!("{}: {e}", path.display()))?;
    if exercise.id.trim().is_empty() {
        return Err(format!("{}: exercise id is empty", path.display()));
    }
    Ok(exercise)
}

async fn run_check(
    cli: &Cli,
    reporter: &Reporter,
    engine: &Engine,
    paths: &CheckPaths<'_>,
    answer: &str,
    session: &str,
) -> ExitCode {
    let exercise = match load_exercise(paths.exercise) {
        Ok(exercise) => exercise,
        Err(e) => {
            reporter.error(&format!("Failed to load exercise: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let state = match resume_state(engine, paths.state) {
        Ok(state) => state,
        Err(e) => {
            reporter.error(&format!("Failed to load state: {e}"));
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    };
    let mut tracker = match paths.attempts {
        Some(path) if path.exists() => match load_json::<AttemptTracker>(path) {
            Ok(tracker) => tracker,
            Err(e) => {
                reporter.error(&format!("Failed to load attempts: {e}"));
                return ExitCode::from(exit_code::EXECUTION_ERROR);
            }
        },
        _ => AttemptTracker::new(),
    };

    let submission = engine
        .submit(&mut tracker, session, &exercise, answer, &state)
        .await;

    let saved = paths
        .state
        .map_or(Ok(()), |path| save_json(&submission.state, path))
        .and_then(|()| paths.attempts.map_or(Ok(()), |path| save_json(&tracker, path)));
    if let Err(e) = saved {
        reporter.error(&format!("Failed to save session: {e}"));
        return ExitCode::from(exit_code::EXECUTION_ERROR);
    }

    match cli.format {
        OutputFormat::Json => print_json(&CheckReport {
            timestamp: iso8601_now(),
            exercise: &exercise.id,
            result: &submission.result,
            validation: &submission.validation,
        }),
        OutputFormat::Table => {
            reporter.command_output(&submission.result);
            reporter.verdict(&exercise.id, &submission.validation);
        }
    }

    if submission.validation.passed {
        ExitCode::from(exit_code::SUCCESS)
    } else {
        ExitCode::from(exit_code::NOT_PASSED)
    }
}

#[derive(Serialize)]
struct ReplayReport<'a> {
    timestamp: String,
    passed: usize,
    failed: usize,
    steps: &'a [StepReport],
}

fn print_replay_table(reports: &[StepReport]) {
    let mut table = Table::new();
    table.set_header(vec!["#", "Input", "Exit", "Exercise", "Score", "Verdict"]);

    for report in reports {
        let verdict_cell = if !report.is_checked() {
            Cell::new("-")
        } else if report.passed() {
            Cell::new("Pass").fg(Color::Green)
        } else {
            Cell::new("Fail").fg(Color::Red)
        };
        let score = report
            .validation
            .as_ref()
            .map_or_else(|| "-".to_string(), |v| format!("{:.2}", v.score));

        table.add_row(vec![
            Cell::new(report.index),
            Cell::new(&report.input),
            Cell::new(report.result.exit_code),
            Cell::new(report.exercise.as_deref().unwrap_or("-")),
            Cell::new(score),
            verdict_cell,
        ]);
    }

    println!("{table}");
}

async fn run_replay(
    cli: &Cli,
    reporter: &Reporter,
    engine: &Engine,
    scenario_path: &Path,
    save_state: Option<&Path>,
) -> ExitCode {
    let scenario = match load_scenario(scenario_path) {
        Ok(scenario) => scenario,
        Err(e) => {
            reporter.error(&format!("Failed to load scenario: {e}"));
            return ExitCode::from(exit_code::CONFIG_ERROR);
        }
    };

    let initial = match scenario.workstation {
        Some(true) => SimulatorState::default(),
        Some(false) => SimulatorState::empty(),
        None => engine.initial_state(),
    };

    let start_time = Instant::now();
    let mut tracker = AttemptTracker::new();
    let (reports, state) = replay(engine, &scenario, initial, &mut tracker).await;
    let duration = start_time.elapsed();

    if let Some(path) = save_state {
        if let Err(e) = save_json(&state, path) {
            reporter.error(&format!("Failed to save state: {e}"));
            return ExitCode::from(exit_code::EXECUTION_ERROR);
        }
    }

    let failed = reports.iter().filter(|r| !r.passed()).count();
    let passed = reports.iter().filter(|r| r.is_checked() && r.passed()).count();

    match cli.format {
        OutputFormat::Json => print_json(&ReplayReport {
            timestamp: iso8601_now(),
            passed,
            failed,
            steps: &reports,
        }),
        OutputFormat::Table => {
            for report in &reports {
                println!("$ {}", report.input);
                reporter.command_output(&report.result);
                if let (Some(id), Some(validation)) = (&report.exercise, &report.validation) {
                    reporter.verdict(id, validation);
                }
                if let Some(expected) = report.expected_exit {
                    if expected != report.result.exit_code {
                        reporter.warn(&format!(
                            "step {}: expected exit {expected}, got {}",
                            report.index, report.result.exit_code
                        ));
                    }
                }
            }
            if cli.verbose {
                println!();
                print_replay_table(&reports);
            }
            reporter.summary(passed, failed, duration);
        }
    }

    if failed == 0 {
        ExitCode::from(exit_code::SUCCESS)
    } else {
        ExitCode::from(exit_code::NOT_PASSED)
    }
}
