//! Scripted scenarios: a sequence of inputs, some graded as exercises.

use serde::{Deserialize, Serialize};
use skillforge_core::{
    AttemptTracker, CommandResult, Engine, Exercise, SimulatorState, ValidationResult,
};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("scenario has no steps")]
    Empty,
    #[error("step {0}: input is empty")]
    EmptyInput(usize),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Session name used for attempt tracking.
    #[serde(default = "default_session")]
    pub session: String,
    /// Start from the workstation layout; falls back to the config value.
    #[serde(default)]
    pub workstation: Option<bool>,
    pub steps: Vec<Step>,
}

fn default_session() -> String {
    "replay".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    pub input: String,
    /// Grade this step against an exercise.
    #[serde(default)]
    pub exercise: Option<Exercise>,
    /// Expected exit code of the emulated command.
    #[serde(default)]
    pub exit: Option<i32>,
}

/// Load and validate a scenario file.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed, or has no
/// usable steps.
pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let content = std::fs::read_to_string(path)?;
    let scenario: Scenario = serde_yml::from_str(&content)?;
    if scenario.steps.is_empty() {
        return Err(ScenarioError::Empty);
    }
    if let Some(index) = scenario.steps.iter().position(|s| s.input.trim().is_empty()) {
        return Err(ScenarioError::EmptyInput(index + 1));
    }
    Ok(scenario)
}

/// Outcome of one replayed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub input: String,
    pub result: CommandResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exercise: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_exit: Option<i32>,
}

impl StepReport {
    /// Whether the step met its exercise and exit-code expectations.
    #[must_use]
    pub fn passed(&self) -> bool {
        let graded = self.validation.as_ref().is_none_or(|v| v.passed);
        let exit = self.expected_exit.is_none_or(|code| code == self.result.exit_code);
        graded && exit
    }

    #[must_use]
    pub const fn is_checked(&self) -> bool {
        self.validation.is_some() || self.expected_exit.is_some()
    }
}

/// Run every step in order, threading state between them.
pub async fn replay(
    engine: &Engine,
    scenario: &Scenario,
    initial: SimulatorState,
    tracker: &mut AttemptTracker,
) -> (Vec<StepReport>, SimulatorState) {
    let mut state = initial;
    let mut reports = Vec::with_capacity(scenario.steps.len());
    for (index, step) in scenario.steps.iter().enumerate() {
        let (result, next, exercise, validation) = match &step.exercise {
            Some(exercise) => {
                let submission = engine
                    .submit(tracker, &scenario.session, exercise, &step.input, &state)
                    .await;
                (
                    submission.result,
                    submission.state,
                    Some(exercise.id.clone()),
                    Some(submission.validation),
                )
            }
            None => {
                let (result, next) = engine.execute(&step.input, &state).await;
                (result, next, None, None)
            }
        };
        state = next;
        reports.push(StepReport {
            index: index + 1,
            input: step.input.clone(),
            result,
            exercise,
            validation,
            expected_exit: step.exit,
        });
    }
    (reports, state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillforge_core::hints::DEFAULT_ENCOURAGEMENT;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    const SCENARIO: &str = r"
session: demo
workstation: false
steps:
  - input: mkdir project && cd project && touch main.py
  - input: git commit -m init
    exit: 128
  - input: git init
    exercise:
      id: init
      objective: Turn the project into a git repository
      expected_patterns: [git init]
";

    const REENTRY: &str = r"
steps:
  - input: pwd
    exercise: {id: listing, objective: List all files, expected_patterns: [ls -la], hints: [Try a flag]}
  - input: ls
    exercise: {id: listing, objective: List all files, expected_patterns: [ls -la], hints: [Try a flag]}
  - input: whoami
    exercise: {id: user, objective: Show the current user, expected_patterns: [whoami]}
  - input: pwd
    exercise: {id: listing, objective: List all files, expected_patterns: [ls -la], hints: [Try a flag]}
";

    #[test]
    fn test_load_scenario() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("scenario.yaml");
        std::fs::write(&path, SCENARIO)?;
        let scenario = load_scenario(&path)?;
        assert_eq!(scenario.session, "demo");
        assert_eq!(scenario.workstation, Some(false));
        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(scenario.steps[1].exit, Some(128));
        Ok(())
    }

    #[test]
    fn test_load_scenario_rejects_empty_input() -> TestResult {
        let dir = TempDir::new()?;
        let path = dir.path().join("scenario.yaml");
        std::fs::write(&path, "steps:\n  - input: ls\n  - input: '  '\n")?;
        assert!(matches!(
            load_scenario(&path),
            Err(ScenarioError::EmptyInput(2))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_threads_state() -> TestResult {
        let scenario: Scenario = serde_yml::from_str(SCENARIO)?;
        let engine = Engine::default();
        let mut tracker = AttemptTracker::new();
        let (reports, state) = replay(
            &engine,
            &scenario,
            SimulatorState::empty(),
            &mut tracker,
        )
        .await;
        assert_eq!(reports.len(), 3);
        assert!(reports.iter().all(StepReport::passed));
        assert!(!reports[0].is_checked());
        assert_eq!(state.cwd(), "/project");
        assert!(state.git.root_for("/project").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_reentering_exercise_restarts_hints() -> TestResult {
        let scenario: Scenario = serde_yml::from_str(REENTRY)?;
        let engine = Engine::default();
        let mut tracker = AttemptTracker::new();
        let (reports, _) = replay(
            &engine,
            &scenario,
            SimulatorState::default(),
            &mut tracker,
        )
        .await;
        let hints: Vec<Option<&str>> = reports
            .iter()
            .map(|r| r.validation.as_ref().and_then(|v| v.hint.as_deref()))
            .collect();
        assert_eq!(
            hints,
            vec![
                Some(DEFAULT_ENCOURAGEMENT),
                Some("Try a flag"),
                None,
                Some(DEFAULT_ENCOURAGEMENT),
            ]
        );
        assert_eq!(tracker.attempts("replay", "listing"), 1);
        Ok(())
    }
}
