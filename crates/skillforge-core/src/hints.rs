//! Escalating hints over repeated failed attempts.

use crate::generative::{FailedAttempt, Judge, strip_code_fences, with_timeout};
use crate::types::{Exercise, ValidationResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

pub const DEFAULT_ENCOURAGEMENT: &str = "Not quite. Give it another try!";
pub const DEFAULT_FALLBACK_HINT: &str = "Review the exercise instructions carefully and try again.";

/// Failed attempts at one exercise.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttemptLog {
    pub count: u32,
    #[serde(default)]
    pub history: Vec<FailedAttempt>,
}

/// Attempt counters keyed by session, then exercise id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AttemptTracker {
    sessions: BTreeMap<String, BTreeMap<String, AttemptLog>>,
    /// The exercise each session is working on.
    #[serde(default)]
    current: BTreeMap<String, String>,
}

impl AttemptTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) an exercise with a clean counter and history.
    pub fn enter_exercise(&mut self, session: &str, exercise_id: &str) {
        self.sessions
            .entry(session.to_string())
            .or_default()
            .insert(exercise_id.to_string(), AttemptLog::default());
    }

    /// Make `exercise_id` the session's current exercise.
    ///
    /// Arriving from a different exercise (or from none) enters it afresh.
    /// Returns whether the counter was reset.
    pub fn focus(&mut self, session: &str, exercise_id: &str) -> bool {
        if self.current.get(session).is_some_and(|id| id == exercise_id) {
            return false;
        }
        self.current
            .insert(session.to_string(), exercise_id.to_string());
        self.enter_exercise(session, exercise_id);
        true
    }

    #[must_use]
    pub fn current(&self, session: &str) -> Option<&str> {
        self.current.get(session).map(String::as_str)
    }

    #[must_use]
    pub fn log(&self, session: &str, exercise_id: &str) -> Option<&AttemptLog> {
        self.sessions.get(session)?.get(exercise_id)
    }

    #[must_use]
    pub fn attempts(&self, session: &str, exercise_id: &str) -> u32 {
        self.log(session, exercise_id).map_or(0, |log| log.count)
    }

    /// Count one failure, capped at `max_attempts`, and return the count.
    pub fn record_failure(
        &mut self,
        session: &str,
        exercise: &Exercise,
        input: &str,
        score: f64,
    ) -> u32 {
        let log = self
            .sessions
            .entry(session.to_string())
            .or_default()
            .entry(exercise.id.clone())
            .or_default();
        let cap = exercise.max_attempts.max(1);
        log.count = (log.count + 1).min(cap);
        log.history.push(FailedAttempt {
            input: input.to_string(),
            score,
        });
        let excess = log.history.len().saturating_sub(cap as usize);
        log.history.drain(..excess);
        log.count
    }
}

/// Chooses the hint shown after a failed attempt.
#[derive(Clone)]
pub struct HintGenerator {
    judge: Option<Arc<dyn Judge>>,
    timeout_ms: u64,
    encouragement: String,
    fallback: String,
}

impl std::fmt::Debug for HintGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HintGenerator")
            .field("judge", &self.judge.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .field("encouragement", &self.encouragement)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl Default for HintGenerator {
    fn default() -> Self {
        Self {
            judge: None,
            timeout_ms: 30_000,
            encouragement: DEFAULT_ENCOURAGEMENT.to_string(),
            fallback: DEFAULT_FALLBACK_HINT.to_string(),
        }
    }
}

impl HintGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_judge(mut self, judge: Arc<dyn Judge>, timeout_ms: u64) -> Self {
        self.judge = Some(judge);
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn with_texts(mut self, encouragement: &str, fallback: &str) -> Self {
        self.encouragement = encouragement.to_string();
        self.fallback = fallback.to_string();
        self
    }

    /// Record a failed result and pick its hint; passed results get none.
    pub async fn on_result(
        &self,
        tracker: &mut AttemptTracker,
        session: &str,
        exercise: &Exercise,
        input: &str,
        result: &ValidationResult,
    ) -> Option<String> {
        if result.passed {
            return None;
        }
        let attempt = tracker.record_failure(session, exercise, input, result.score);
        let history = tracker
            .log(session, &exercise.id)
            .map(|log| log.history.clone())
            .unwrap_or_default();
        Some(self.hint_for(exercise, attempt, &history).await)
    }

    /// Hint for the given attempt number (1-based).
    pub async fn hint_for(
        &self,
        exercise: &Exercise,
        attempt: u32,
        history: &[FailedAttempt],
    ) -> String {
        if attempt <= 1 {
            return self.encouragement.clone();
        }
        let rung = (attempt - 2) as usize;
        if let Some(hint) = exercise.hints.get(rung) {
            return hint.clone();
        }
        let Some(judge) = &self.judge else {
            return self.fallback.clone();
        };
        match with_timeout(judge.hint(&exercise.objective, history), self.timeout_ms).await {
            Ok(text) => {
                let text = strip_code_fences(&text);
                if text.is_empty() {
                    self.fallback.clone()
                } else {
                    text.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, exercise = %exercise.id, "hint generation unavailable");
                self.fallback.clone()
            }
        }
    }
}
