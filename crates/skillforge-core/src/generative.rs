//! Generative collaborators: output synthesis and semantic judging.
//!
//! Both are external capabilities behind dyn-compatible traits. Their
//! responses are untrusted text; callers sanitize them and treat every
//! failure as recoverable.

use crate::state::SimulatorState;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerativeError {
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no generative backend configured")]
    Unavailable,
}

/// Produces plausible terminal output for input no emulator handles.
pub trait OutputSynthesizer: Send + Sync {
    fn synthesize<'a>(
        &'a self,
        input: &'a str,
        state: &'a SimulatorState,
    ) -> BoxFuture<'a, Result<String, GenerativeError>>;
}

/// What the judge sees of one attempt.
#[derive(Debug, Clone, Copy)]
pub struct JudgeRequest<'a> {
    pub objective: &'a str,
    pub expected_patterns: &'a [String],
    pub input: &'a str,
    pub output: &'a str,
}

/// One failed attempt, kept to seed generated hints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub input: String,
    pub score: f64,
}

/// Scores attempts and writes hints when the deterministic stages give up.
pub trait Judge: Send + Sync {
    fn judge<'a>(&'a self, request: JudgeRequest<'a>)
    -> BoxFuture<'a, Result<String, GenerativeError>>;

    fn hint<'a>(
        &'a self,
        objective: &'a str,
        history: &'a [FailedAttempt],
    ) -> BoxFuture<'a, Result<String, GenerativeError>>;
}

/// Await a generative call under a deadline.
///
/// # Errors
/// `Timeout` when the deadline passes, otherwise the call's own error.
pub async fn with_timeout<F>(call: F, timeout_ms: u64) -> Result<String, GenerativeError>
where
    F: Future<Output = Result<String, GenerativeError>>,
{
    tokio::time::timeout(Duration::from_millis(timeout_ms), call)
        .await
        .map_err(|_| GenerativeError::Timeout(timeout_ms))?
}

/// Body of the first markdown code fence, or the whole text trimmed.
#[must_use]
pub fn strip_code_fences(response: &str) -> &str {
    let Some(start) = response.find("```") else {
        return response.trim();
    };
    let after = &response[start + 3..];
    // Skip the language identifier line.
    let body_start = after.find('\n').map_or(0, |n| n + 1);
    let body = &after[body_start..];
    body.find("```")
        .map_or_else(|| body.trim(), |end| body[..end].trim())
}

/// Build the prompt sent to an output synthesizer.
#[must_use]
pub fn synthesis_prompt(input: &str, state: &SimulatorState) -> String {
    format!(
        "You are emulating a Linux developer terminal. Environment:\n{}\n\
         Show exactly what the terminal would print for the command below, \
         with no commentary. If the command fails, start with a line \
         `Exit Code: N`.\n\n$ {input}",
        state.describe()
    )
}

/// Build the prompt sent to a judge for scoring.
#[must_use]
pub fn judge_prompt(request: &JudgeRequest<'_>) -> String {
    format!(
        "Objective: {}\nAcceptable answers: {}\nLearner input: {}\nOutput: {}\n\n\
         Does the input achieve the objective? Respond with JSON \
         {{\"score\": number between 0 and 1, \"feedback\": string}}.",
        request.objective,
        request.expected_patterns.join(" | "),
        request.input,
        request.output
    )
}

/// Build the prompt sent to a judge for a hint.
#[must_use]
pub fn hint_prompt(objective: &str, history: &[FailedAttempt]) -> String {
    let attempts: Vec<String> = history
        .iter()
        .map(|a| format!("- `{}` (score {:.2})", a.input, a.score))
        .collect();
    format!(
        "A learner is working on: {objective}\nTheir attempts so far:\n{}\n\n\
         Give one short hint that moves them closer without revealing the answer.",
        attempts.join("\n")
    )
}
