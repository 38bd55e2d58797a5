//! Exercise validation: deterministic stages first, then the judge.

use crate::generative::{Judge, JudgeRequest, strip_code_fences, with_timeout};
use crate::matcher::{CommandClassifier, TextMatch, changes_match, match_text};
use crate::types::{CommandResult, Exercise, MatchStrategy, ValidationResult};
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

pub const DEFAULT_PASS_THRESHOLD: f64 = 0.7;

const CORRECT: &str = "Correct! Well done.";
const CONTAINS: &str =
    "Your answer contains the expected output, but includes extra content. Try to be more precise.";
const SUBSET: &str = "You're on the right track, but your answer is incomplete.";
const STRUCTURAL: &str = "Correct! The environment ended up in the expected state.";
const NO_MATCH: &str = "That's not quite right. Review the exercise instructions and try again.";
const NO_EXPECTATIONS: &str =
    "Answer received. Unable to fully validate without expected output defined.";
const EMPTY: &str = "No answer provided. Please try again.";
const UNAVAILABLE: &str = "Cannot evaluate this answer right now, try again.";
const UNREADABLE: &str = "The evaluator returned an unreadable response.";

static VERDICT_SCHEMA: LazyLock<Option<jsonschema::Validator>> = LazyLock::new(|| {
    jsonschema::validator_for(&json!({
        "type": "object",
        "required": ["score"],
        "properties": {
            "score": { "type": ["number", "string"] },
            "feedback": { "type": "string" },
            "hint": { "type": ["string", "null"] }
        }
    }))
    .ok()
});

/// A sanitized judge response.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// Always within `[0, 1]`.
    pub score: f64,
    pub feedback: String,
    pub hint: Option<String>,
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn parse_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn non_empty_hint(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty() && !text.eq_ignore_ascii_case("none")).then(|| text.to_string())
}

/// Parse raw judge text as JSON or as `Score:`/`Feedback:`/`Hint:` lines.
///
/// Never fails: anything unreadable becomes a zero score.
#[must_use]
pub fn parse_verdict(raw: &str) -> Verdict {
    let body = strip_code_fences(raw);
    let unreadable = || Verdict {
        score: 0.0,
        feedback: UNREADABLE.to_string(),
        hint: None,
    };

    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let valid = VERDICT_SCHEMA
            .as_ref()
            .is_some_and(|schema| schema.is_valid(&value));
        if !valid {
            return unreadable();
        }
        let Some(score) = value.get("score").and_then(parse_score) else {
            return unreadable();
        };
        return Verdict {
            score: clamp_score(score),
            feedback: value
                .get("feedback")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string(),
            hint: value.get("hint").and_then(Value::as_str).and_then(non_empty_hint),
        };
    }

    let mut score = None;
    let mut feedback = String::new();
    let mut hint = None;
    for line in body.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_lowercase().as_str() {
            "score" => score = rest.trim().parse::<f64>().ok(),
            "feedback" => feedback = rest.trim().to_string(),
            "hint" => hint = non_empty_hint(rest),
            _ => {}
        }
    }
    match score {
        Some(score) => Verdict {
            score: clamp_score(score),
            feedback,
            hint,
        },
        None => unreadable(),
    }
}

/// Scores learner answers against exercises.
#[derive(Clone)]
pub struct Validator {
    classifier: CommandClassifier,
    judge: Option<Arc<dyn Judge>>,
    judge_timeout_ms: u64,
    pass_threshold: f64,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("classifier", &self.classifier)
            .field("judge", &self.judge.is_some())
            .field("judge_timeout_ms", &self.judge_timeout_ms)
            .field("pass_threshold", &self.pass_threshold)
            .finish()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            classifier: CommandClassifier::default(),
            judge: None,
            judge_timeout_ms: 30_000,
            pass_threshold: DEFAULT_PASS_THRESHOLD,
        }
    }
}

impl Validator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_judge(mut self, judge: Arc<dyn Judge>, timeout_ms: u64) -> Self {
        self.judge = Some(judge);
        self.judge_timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: CommandClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[must_use]
    pub const fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    #[must_use]
    pub const fn classifier(&self) -> &CommandClassifier {
        &self.classifier
    }

    /// The exercise override, or the configured threshold.
    #[must_use]
    pub fn threshold_for(&self, exercise: &Exercise) -> f64 {
        exercise.pass_threshold.unwrap_or(self.pass_threshold)
    }

    /// Run the deterministic stages only.
    #[must_use]
    pub fn match_deterministic(
        &self,
        input: &str,
        result: &CommandResult,
        exercise: &Exercise,
    ) -> Option<ValidationResult> {
        let threshold = self.threshold_for(exercise);
        let mut best: Option<TextMatch> = None;
        for pattern in exercise.patterns() {
            let command_like = self.classifier.is_command_like(pattern);
            let output = result.stdout.trim_end();
            let on_input = match_text(pattern, input, command_like);
            let on_output = (!command_like && !output.is_empty())
                .then(|| match_text(pattern, output, false))
                .flatten();
            let found = match (on_input, on_output) {
                (Some(a), Some(b)) if b.score > a.score => Some(b),
                (a, b) => a.or(b),
            };
            if let Some(found) = found {
                // A full match on a later pattern beats a partial one.
                if found.score >= 1.0 {
                    best = Some(found);
                    break;
                }
                best = best.or(Some(found));
            }
        }

        if let Some(found) = best {
            debug!(strategy = %found.strategy, score = found.score, "answer matched");
            let feedback = match found.strategy {
                _ if found.score >= 1.0 => CORRECT,
                MatchStrategy::Subset => SUBSET,
                _ => CONTAINS,
            };
            let mut validation =
                ValidationResult::scored(found.score, threshold, feedback, found.strategy);
            if !validation.passed {
                validation.hint = exercise.hints.first().cloned();
            }
            return Some(validation);
        }
        if changes_match(&exercise.expected_changes, &result.mutations) {
            debug!("expected changes applied");
            return Some(ValidationResult::scored(
                1.0,
                threshold,
                STRUCTURAL,
                MatchStrategy::Structural,
            ));
        }
        None
    }

    /// Score one attempt.
    ///
    /// `input` is compared as typed; `result` is what the router produced
    /// for it.
    pub async fn validate(
        &self,
        input: &str,
        result: &CommandResult,
        exercise: &Exercise,
    ) -> ValidationResult {
        let threshold = self.threshold_for(exercise);
        if input.trim().is_empty() {
            return ValidationResult::scored(0.0, threshold, EMPTY, MatchStrategy::EmptyInput);
        }
        if let Some(matched) = self.match_deterministic(input, result, exercise) {
            return matched;
        }

        let judge = self.judge.as_ref().filter(|_| exercise.semantic_evaluation);
        let Some(judge) = judge else {
            let no_expectations =
                exercise.patterns().next().is_none() && exercise.expected_changes.is_empty();
            return if no_expectations {
                ValidationResult::scored(0.5, threshold, NO_EXPECTATIONS, MatchStrategy::NoMatch)
            } else {
                ValidationResult::scored(0.0, threshold, NO_MATCH, MatchStrategy::NoMatch)
            };
        };

        let patterns: Vec<String> = exercise.patterns().map(ToString::to_string).collect();
        let output = if result.stderr.is_empty() {
            result.stdout.clone()
        } else {
            format!("{}\n{}", result.stdout, result.stderr)
        };
        let request = JudgeRequest {
            objective: &exercise.objective,
            expected_patterns: &patterns,
            input,
            output: output.trim(),
        };
        match with_timeout(judge.judge(request), self.judge_timeout_ms).await {
            Ok(raw) => {
                let verdict = parse_verdict(&raw);
                debug!(score = verdict.score, "judge verdict");
                let mut validation = ValidationResult::scored(
                    verdict.score,
                    threshold,
                    &verdict.feedback,
                    MatchStrategy::Judge,
                );
                validation.hint = verdict.hint;
                validation
            }
            Err(e) => {
                warn!(error = %e, exercise = %exercise.id, "judge unavailable");
                ValidationResult::scored(0.0, threshold, UNAVAILABLE, MatchStrategy::JudgeUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generative::GenerativeError;
    use crate::generative::doubles::FixedJudge;
    use crate::router::Router;
    use crate::state::SimulatorState;
    use crate::types::ChangeExpectation;
    use futures::future::BoxFuture;
    use std::time::Duration;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn judged(text: &str) -> Validator {
        Validator::new().with_judge(Arc::new(FixedJudge::verdict(text)), 1_000)
    }

    fn free_text(expected: &str) -> Exercise {
        let mut exercise = Exercise::new("ex", "Explain it").expecting(expected);
        exercise.semantic_evaluation = true;
        exercise
    }

    #[test]
    fn test_parse_verdict_json_and_lines() {
        let json = parse_verdict("```json\n{\"score\": 0.8, \"feedback\": \"Good\"}\n```");
        assert!((json.score - 0.8).abs() < f64::EPSILON);
        assert_eq!(json.feedback, "Good");

        let lines = parse_verdict("Status: partial\nScore: 0.4\nFeedback: Close\nHint: none");
        assert!((lines.score - 0.4).abs() < f64::EPSILON);
        assert_eq!(lines.feedback, "Close");
        assert_eq!(lines.hint, None);
    }

    #[test]
    fn test_parse_verdict_sanitizes() {
        assert!((parse_verdict("{\"score\": 7}").score - 1.0).abs() < f64::EPSILON);
        assert!(parse_verdict("{\"score\": -2}").score.abs() < f64::EPSILON);
        assert!(parse_verdict("Score: NaN").score.abs() < f64::EPSILON);
        assert!(parse_verdict("{\"score\": \"high\"}").score.abs() < f64::EPSILON);
        assert!(parse_verdict("{\"feedback\": \"no score\"}").score.abs() < f64::EPSILON);
        assert_eq!(parse_verdict("I think it is fine").feedback, UNREADABLE);
    }

    #[tokio::test]
    async fn test_trailing_space_passes_via_whitespace_stage() {
        let exercise = Exercise::new("ls", "List everything").expecting("ls -la");
        let result = Validator::new()
            .validate("ls -la ", &CommandResult::default(), &exercise)
            .await;
        assert!(result.passed);
        assert_eq!(result.strategy, MatchStrategy::WhitespaceNormalized);
    }

    #[tokio::test]
    async fn test_flag_order_passes_via_token_set() {
        let exercise = Exercise::new("ls", "List everything").expecting("ls -la");
        let result = Validator::new()
            .validate("ls -al", &CommandResult::default(), &exercise)
            .await;
        assert!(result.passed);
        assert_eq!(result.strategy, MatchStrategy::TokenSet);
    }

    #[tokio::test]
    async fn test_contains_scores_partial() {
        let exercise = free_text("Hello, World!");
        let result = Validator::new()
            .validate("print('x') gives Hello, World!", &CommandResult::default(), &exercise)
            .await;
        assert_eq!(result.strategy, MatchStrategy::Contains);
        assert!(result.passed);

        let mut strict = exercise;
        strict.pass_threshold = Some(0.9);
        let result = Validator::new()
            .validate("print('x') gives Hello, World!", &CommandResult::default(), &strict)
            .await;
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_incomplete_answer_scores_subset() {
        let exercise = Exercise::new("ls", "List everything")
            .expecting("ls -la")
            .with_hints(&["Add the show-all flag"]);
        let result = judged("{\"score\": 1}")
            .validate("ls -l", &CommandResult::default(), &exercise)
            .await;
        assert_eq!(result.strategy, MatchStrategy::Subset);
        assert!((result.score - 0.5).abs() < f64::EPSILON);
        assert!(!result.passed);
        assert_eq!(result.feedback, SUBSET);
        assert_eq!(result.hint.as_deref(), Some("Add the show-all flag"));

        let text = Validator::new()
            .validate("Hello", &CommandResult::default(), &free_text("Hello, World!"))
            .await;
        assert_eq!(text.strategy, MatchStrategy::Subset);
    }

    #[tokio::test]
    async fn test_output_compared_for_free_text_patterns() {
        let exercise = free_text("Hello, World!");
        let router = Router::default();
        let input = "python3 -c \"print('Hello, World!')\"";
        let (result, _) = router.execute(input, &SimulatorState::default()).await;
        let validation = Validator::new().validate(input, &result, &exercise).await;
        assert!(validation.passed);
        assert_eq!(validation.strategy, MatchStrategy::Exact);
    }

    #[tokio::test]
    async fn test_structural_match() -> TestResult {
        let mut exercise = Exercise::new("mk", "Create a project directory");
        exercise.expected_changes =
            serde_yml::from_str::<Vec<ChangeExpectation>>("- kind: dir_created\n")?;
        let (result, _) = Router::default()
            .execute("mkdir -p app/src", &SimulatorState::default())
            .await;
        let validation = Validator::new().validate("mkdir -p app/src", &result, &exercise).await;
        assert_eq!(validation.strategy, MatchStrategy::Structural);
        assert!(validation.passed);
        Ok(())
    }

    #[tokio::test]
    async fn test_judge_threshold_boundary() {
        let exercise = free_text("something else");
        let at = judged("{\"score\": 0.7, \"feedback\": \"ok\"}")
            .validate("answer", &CommandResult::default(), &exercise)
            .await;
        assert_eq!(at.strategy, MatchStrategy::Judge);
        assert!(at.passed);

        let below = judged("{\"score\": 0.6999, \"feedback\": \"close\"}")
            .validate("answer", &CommandResult::default(), &exercise)
            .await;
        assert!(!below.passed);
        assert_eq!(below.feedback, "close");
    }

    #[tokio::test]
    async fn test_judge_failure_is_recoverable() {
        let judge = FixedJudge {
            verdict: Err(GenerativeError::Transport("boom".to_string())),
            hint: Err(GenerativeError::Unavailable),
        };
        let result = Validator::new()
            .with_judge(Arc::new(judge), 1_000)
            .validate("answer", &CommandResult::default(), &free_text("x y z"))
            .await;
        assert_eq!(result.strategy, MatchStrategy::JudgeUnavailable);
        assert!(result.score.abs() < f64::EPSILON);
        assert_eq!(result.feedback, UNAVAILABLE);
    }

    struct SlowJudge;

    impl Judge for SlowJudge {
        fn judge<'a>(
            &'a self,
            _request: JudgeRequest<'a>,
        ) -> BoxFuture<'a, Result<String, GenerativeError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(120)).await;
                Ok("{\"score\": 1}".to_string())
            })
        }

        fn hint<'a>(
            &'a self,
            _objective: &'a str,
            _history: &'a [crate::generative::FailedAttempt],
        ) -> BoxFuture<'a, Result<String, GenerativeError>> {
            Box::pin(async { Err(GenerativeError::Unavailable) })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_judge_timeout() {
        let result = Validator::new()
            .with_judge(Arc::new(SlowJudge), 500)
            .validate("answer", &CommandResult::default(), &free_text("x y z"))
            .await;
        assert_eq!(result.strategy, MatchStrategy::JudgeUnavailable);
    }

    #[tokio::test]
    async fn test_semantic_evaluation_disabled() {
        let mut exercise = free_text("x y z");
        exercise.semantic_evaluation = false;
        let result = judged("{\"score\": 1}")
            .validate("answer", &CommandResult::default(), &exercise)
            .await;
        assert_eq!(result.strategy, MatchStrategy::NoMatch);
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let result = Validator::new()
            .validate("   ", &CommandResult::default(), &free_text("x"))
            .await;
        assert_eq!(result.strategy, MatchStrategy::EmptyInput);
        assert_eq!(result.feedback, EMPTY);
    }
}
