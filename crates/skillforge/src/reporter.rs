//! Terminal output for command results and verdicts.

use skillforge_core::{CommandResult, ValidationResult};
use std::io::{self, Write};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Show match strategy and score alongside verdicts.
    pub verbose: bool,
    /// Use colors in output.
    pub color: bool,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reporter {
    config: ReporterConfig,
}

impl Reporter {
    #[must_use]
    pub const fn new(config: ReporterConfig) -> Self {
        Self { config }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if self.config.color {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    /// Print emulated output the way a terminal would.
    pub fn command_output(&self, result: &CommandResult) {
        if !result.stdout.is_empty() {
            println!("{}", result.stdout);
        }
        if !result.stderr.is_empty() {
            eprintln!("{}", result.stderr);
        }
        self.flush();
    }

    /// Print a verdict line, feedback and hint.
    pub fn verdict(&self, exercise_id: &str, validation: &ValidationResult) {
        let status = if validation.passed {
            self.paint("ok", "32")
        } else {
            self.paint("FAILED", "31")
        };
        println!("exercise {exercise_id} ... {status}");
        println!("  {}", validation.feedback);
        if self.config.verbose {
            println!(
                "  (strategy: {}, score: {:.2})",
                validation.strategy, validation.score
            );
        }
        if let Some(hint) = &validation.hint {
            println!("  {} {hint}", self.paint("hint:", "33"));
        }
        self.flush();
    }

    pub fn summary(&self, passed: usize, failed: usize, duration: Duration) {
        let status = if failed == 0 {
            self.paint("ok", "32")
        } else {
            self.paint("FAILED", "31")
        };
        println!();
        println!(
            "replay result: {status}. {passed} passed; {failed} failed; finished in {:.1}s",
            duration.as_secs_f64()
        );
    }

    pub fn warn(&self, message: &str) {
        eprintln!("{}: {message}", self.paint("warning", "33"));
    }

    pub fn error(&self, message: &str) {
        eprintln!("{}: {message}", self.paint("error", "31"));
    }

    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}
