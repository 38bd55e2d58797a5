//! Deterministic matching stages.
//!
//! Stages run in a fixed order and the first that matches decides:
//! exact, case-insensitive, whitespace-normalized, then token set and token
//! subset for commands, or contains and subset for free text. Structural
//! matching over mutations is separate because it does not compare text.

use crate::router::default_command_verbs;
use crate::tokenize::{Token, expand_short_cluster, lex};
use crate::types::{ChangeExpectation, MatchStrategy, Mutation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Score given to a pattern found inside a longer answer.
pub const CONTAINS_SCORE: f64 = 0.7;

/// Score given to an answer that is only part of the pattern.
pub const SUBSET_SCORE: f64 = 0.5;

/// Which tokens of a pattern are checked against the verb list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClassifierScope {
    LeadingToken,
    #[default]
    AnyToken,
}

/// Decides whether an expected pattern is a command or free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandClassifier {
    verbs: BTreeSet<String>,
    scope: ClassifierScope,
}

impl Default for CommandClassifier {
    fn default() -> Self {
        Self::new(default_command_verbs(), ClassifierScope::default())
    }
}

impl CommandClassifier {
    #[must_use]
    pub const fn new(verbs: BTreeSet<String>, scope: ClassifierScope) -> Self {
        Self { verbs, scope }
    }

    #[must_use]
    pub const fn scope(&self) -> ClassifierScope {
        self.scope
    }

    #[must_use]
    pub fn is_command_like(&self, pattern: &str) -> bool {
        let words = words(pattern);
        match self.scope {
            ClassifierScope::LeadingToken => words.first().is_some_and(|w| self.verbs.contains(w)),
            ClassifierScope::AnyToken => words.iter().any(|w| self.verbs.contains(w)),
        }
    }
}

/// Quote-aware words of `text`; plain whitespace splitting if it does not lex.
fn words(text: &str) -> Vec<String> {
    lex(text).map_or_else(
        |_| text.split_whitespace().map(ToString::to_string).collect(),
        |tokens| tokens.iter().map(Token::text).collect(),
    )
}

#[must_use]
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Order-insensitive token set with short flag clusters expanded.
#[must_use]
pub fn token_set(text: &str) -> BTreeSet<String> {
    words(text)
        .iter()
        .flat_map(|w| expand_short_cluster(w))
        .collect()
}

/// A text stage that matched, with its score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextMatch {
    pub strategy: MatchStrategy,
    pub score: f64,
}

impl TextMatch {
    const fn full(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            score: 1.0,
        }
    }
}

/// Run the text stages of one pattern against one candidate.
#[must_use]
pub fn match_text(pattern: &str, candidate: &str, command_like: bool) -> Option<TextMatch> {
    let expected = pattern.trim();
    if expected.is_empty() {
        return None;
    }
    if candidate == expected {
        return Some(TextMatch::full(MatchStrategy::Exact));
    }
    if candidate.to_lowercase() == expected.to_lowercase() {
        return Some(TextMatch::full(MatchStrategy::CaseInsensitive));
    }
    if normalize_whitespace(candidate) == normalize_whitespace(expected) {
        return Some(TextMatch::full(MatchStrategy::WhitespaceNormalized));
    }
    let subset = TextMatch {
        strategy: MatchStrategy::Subset,
        score: SUBSET_SCORE,
    };
    if command_like {
        let wanted = token_set(expected);
        let given = token_set(candidate);
        if wanted.is_empty() || given.is_empty() {
            return None;
        }
        if given == wanted {
            return Some(TextMatch::full(MatchStrategy::TokenSet));
        }
        return given.is_subset(&wanted).then_some(subset);
    }
    let candidate = candidate.trim().to_lowercase();
    let expected = expected.to_lowercase();
    if candidate.contains(&expected) {
        return Some(TextMatch {
            strategy: MatchStrategy::Contains,
            score: CONTAINS_SCORE,
        });
    }
    (!candidate.is_empty() && expected.contains(&candidate)).then_some(subset)
}

/// Every expectation is met by at least one applied mutation.
#[must_use]
pub fn changes_match(expected: &[ChangeExpectation], applied: &[Mutation]) -> bool {
    !expected.is_empty()
        && expected
            .iter()
            .all(|want| applied.iter().any(|m| want.matches(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn strategy(pattern: &str, candidate: &str, command_like: bool) -> Option<MatchStrategy> {
        match_text(pattern, candidate, command_like).map(|m| m.strategy)
    }

    #[test]
    fn test_stage_precedence() {
        assert_eq!(strategy("ls -la", "ls -la", true), Some(MatchStrategy::Exact));
        assert_eq!(strategy("LS -LA", "ls -la", true), Some(MatchStrategy::CaseInsensitive));
        assert_eq!(
            strategy("ls -la", "ls -la ", true),
            Some(MatchStrategy::WhitespaceNormalized)
        );
        assert_eq!(strategy("ls -la", "ls -al", true), Some(MatchStrategy::TokenSet));
        assert_eq!(strategy("ls -la", "ls -a -l", true), Some(MatchStrategy::TokenSet));
        assert_eq!(strategy("ls -la", "ls -l", true), Some(MatchStrategy::Subset));
        assert_eq!(strategy("ls -la", "ls -l /tmp", true), None);
    }

    #[test]
    fn test_subset_scores_half() {
        let partial = match_text("Hello, World!", "hello", false);
        assert_eq!(
            partial,
            Some(TextMatch {
                strategy: MatchStrategy::Subset,
                score: SUBSET_SCORE
            })
        );
        assert_eq!(
            strategy("git checkout -b feature", "git checkout", true),
            Some(MatchStrategy::Subset)
        );
        assert_eq!(strategy("Hello, World!", "   ", false), None);
    }

    #[test]
    fn test_contains_only_for_free_text() {
        let found = match_text("hello world", "it printed Hello World twice", false);
        assert_eq!(
            found,
            Some(TextMatch {
                strategy: MatchStrategy::Contains,
                score: CONTAINS_SCORE
            })
        );
        assert_eq!(strategy("git status", "git status --short", true), None);
    }

    #[test]
    fn test_token_set_respects_quotes() {
        assert_eq!(
            strategy("git commit -m \"first commit\"", "git commit -m 'first commit'", true),
            Some(MatchStrategy::TokenSet)
        );
        assert_eq!(strategy("git commit -m \"a b\"", "git commit -m a b", true), None);
    }

    #[test]
    fn test_classifier_scopes() {
        let any = CommandClassifier::default();
        assert!(any.is_command_like("ls -la"));
        assert!(any.is_command_like("sudo docker ps"));
        assert!(!any.is_command_like("Hello, World!"));

        let leading = CommandClassifier::new(
            ["docker".to_string()].into_iter().collect(),
            ClassifierScope::LeadingToken,
        );
        assert!(leading.is_command_like("docker ps"));
        assert!(!leading.is_command_like("sudo docker ps"));
    }

    #[test]
    fn test_changes_match() -> TestResult {
        let expected: Vec<ChangeExpectation> =
            serde_yml::from_str("- kind: dir_created\n  path: /home/user/project\n")?;
        let applied = vec![
            Mutation::CwdChanged {
                path: "/home/user".to_string(),
            },
            Mutation::DirCreated {
                path: "/home/user/project".to_string(),
            },
        ];
        assert!(changes_match(&expected, &applied));
        assert!(!changes_match(&expected, &applied[..1]));
        assert!(!changes_match(&[], &applied));
        Ok(())
    }
}
