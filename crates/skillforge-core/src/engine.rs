//! One learner submission end to end: route, emulate, validate, hint.

use crate::config::EngineConfig;
use crate::generative::{Judge, OutputSynthesizer};
use crate::hints::{AttemptTracker, HintGenerator};
use crate::router::{RuleTable, Router};
use crate::state::SimulatorState;
use crate::types::{CommandResult, Exercise, ValidationResult};
use crate::validator::Validator;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Everything a submission produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub result: CommandResult,
    pub state: SimulatorState,
    pub validation: ValidationResult,
}

#[derive(Debug, Clone)]
pub struct Engine {
    router: Router,
    validator: Validator,
    hints: HintGenerator,
    workstation: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl Engine {
    #[must_use]
    pub const fn new(
        router: Router,
        validator: Validator,
        hints: HintGenerator,
    ) -> Self {
        Self {
            router,
            validator,
            hints,
            workstation: true,
        }
    }

    /// A deterministic engine: no synthesizer, no judge.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_generative(config, None, None)
    }

    /// An engine wired to the given generative collaborators.
    #[must_use]
    pub fn with_generative(
        config: &EngineConfig,
        synthesizer: Option<Arc<dyn OutputSynthesizer>>,
        judge: Option<Arc<dyn Judge>>,
    ) -> Self {
        let mut router = Router::new(RuleTable::standard());
        if let Some(synthesizer) = synthesizer {
            router = router.with_synthesizer(synthesizer, config.synthesizer_timeout_ms);
        }
        let mut validator = Validator::new()
            .with_classifier(config.classifier())
            .with_pass_threshold(config.pass_threshold);
        let mut hints =
            HintGenerator::new().with_texts(&config.encouragement, &config.fallback_hint);
        if let Some(judge) = judge {
            validator = validator.with_judge(Arc::clone(&judge), config.judge_timeout_ms);
            hints = hints.with_judge(judge, config.judge_timeout_ms);
        }
        Self {
            router,
            validator,
            hints,
            workstation: config.workstation,
        }
    }

    /// The state a new session starts from.
    #[must_use]
    pub fn initial_state(&self) -> SimulatorState {
        if self.workstation {
            SimulatorState::default()
        } else {
            SimulatorState::empty()
        }
    }

    #[must_use]
    pub const fn router(&self) -> &Router {
        &self.router
    }

    #[must_use]
    pub const fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Run input without judging it.
    pub async fn execute(
        &self,
        input: &str,
        state: &SimulatorState,
    ) -> (CommandResult, SimulatorState) {
        self.router.execute(input, state).await
    }

    /// Run and judge one answer to `exercise`.
    ///
    /// Moving to a different exercise than the session's last one resets its
    /// attempts. A failed attempt is counted in `tracker` and its hint
    /// attached to the validation result.
    pub async fn submit(
        &self,
        tracker: &mut AttemptTracker,
        session: &str,
        exercise: &Exercise,
        input: &str,
        state: &SimulatorState,
    ) -> Submission {
        if tracker.focus(session, &exercise.id) {
            debug!(session, exercise = %exercise.id, "exercise entered");
        }
        let (result, state) = self.router.execute(input, state).await;
        let mut validation = self.validator.validate(input, &result, exercise).await;
        let hint = self
            .hints
            .on_result(tracker, session, exercise, input, &validation)
            .await;
        // A judge-supplied hint is kept when the ladder has nothing better.
        if hint.is_some() {
            validation.hint = hint;
        }
        debug!(
            exercise = %exercise.id,
            passed = validation.passed,
            score = validation.score,
            "submission judged"
        );
        Submission {
            result,
            state,
            validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generative::doubles::FixedSynthesizer;
    use crate::hints::DEFAULT_ENCOURAGEMENT;
    use crate::types::{MatchStrategy, Mutation, ResultOrigin};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn test_scenario_project_setup() -> TestResult {
        let engine = Engine::default();
        let state = SimulatorState::empty();
        let exercise = Exercise::new("setup", "Create a project with main.py")
            .expecting("mkdir project && cd project && touch main.py");
        let mut tracker = AttemptTracker::new();
        let submission = engine
            .submit(
                &mut tracker,
                "s1",
                &exercise,
                "mkdir project && cd project && touch main.py",
                &state,
            )
            .await;
        assert!(submission.validation.passed);
        assert_eq!(submission.validation.strategy, MatchStrategy::Exact);
        assert_eq!(
            submission.result.mutations,
            vec![
                Mutation::DirCreated {
                    path: "/project".to_string()
                },
                Mutation::CwdChanged {
                    path: "/project".to_string()
                },
                Mutation::FileCreated {
                    path: "/project/main.py".to_string()
                },
            ]
        );
        assert_eq!(submission.state.cwd(), "/project");
        assert!(submission.state.vfs.is_file("/project/main.py"));
        assert_eq!(submission.validation.hint, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_command_goes_to_synthesizer() {
        let config = EngineConfig::default();
        let engine = Engine::with_generative(
            &config,
            Some(Arc::new(FixedSynthesizer(Ok("< moo >".to_string())))),
            None,
        );
        let state = engine.initial_state();
        let (result, next) = engine.execute("cowsay moo", &state).await;
        assert_eq!(result.stdout, "< moo >");
        assert_eq!(result.origin, ResultOrigin::Synthesized);
        assert!(result.mutations.is_empty());
        assert_eq!(next, state);
    }

    #[tokio::test]
    async fn test_failed_submission_carries_hint() {
        let engine = Engine::default();
        let exercise = Exercise::new("ls", "List all files").expecting("ls -la");
        let mut tracker = AttemptTracker::new();
        let state = engine.initial_state();
        let submission = engine
            .submit(&mut tracker, "s1", &exercise, "pwd", &state)
            .await;
        assert!(!submission.validation.passed);
        assert_eq!(
            submission.validation.hint.as_deref(),
            Some(DEFAULT_ENCOURAGEMENT)
        );
        assert_eq!(tracker.attempts("s1", "ls"), 1);
    }

    #[tokio::test]
    async fn test_reentered_exercise_starts_over() {
        let engine = Engine::default();
        let state = engine.initial_state();
        let listing = Exercise::new("ls", "List all files")
            .expecting("ls -la")
            .with_hints(&["Hidden files need a flag"]);
        let location = Exercise::new("pwd", "Print the directory").expecting("pwd");
        let mut tracker = AttemptTracker::new();

        let mut hints = Vec::new();
        for exercise in [&listing, &listing, &location, &listing] {
            let submission = engine
                .submit(&mut tracker, "s1", exercise, "whoami", &state)
                .await;
            hints.push(submission.validation.hint);
        }
        assert_eq!(hints[0].as_deref(), Some(DEFAULT_ENCOURAGEMENT));
        assert_eq!(hints[1].as_deref(), Some("Hidden files need a flag"));
        assert_eq!(hints[3].as_deref(), Some(DEFAULT_ENCOURAGEMENT));
        assert_eq!(tracker.attempts("s1", "ls"), 1);
    }

    #[test]
    fn test_initial_state_follows_config() {
        let config = EngineConfig {
            workstation: false,
            ..EngineConfig::default()
        };
        let engine = Engine::from_config(&config);
        assert_eq!(engine.initial_state().cwd(), "/");
    }
}
