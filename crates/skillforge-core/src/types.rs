//! Core data types shared by the simulator and the validator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single change applied to the simulated environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    FileCreated { path: String },
    FileWritten { path: String },
    DirCreated { path: String },
    Removed { path: String },
    CwdChanged { path: String },
    EnvSet { name: String, value: String },
    EnvUnset { name: String },
    GitInitialized { root: String },
    GitStaged { path: String },
    GitCommitted {
        id: String,
        branch: String,
        message: String,
    },
    GitBranchCreated { name: String },
    GitBranchSwitched { name: String },
    DockerImageAdded { image: String },
    DockerImageRemoved { image: String },
    ContainerCreated { id: String, image: String },
    ContainerStarted { id: String },
    ContainerStopped { id: String },
    ContainerRemoved { id: String },
    /// `resource` is the lowercase resource kind, e.g. `deployment`.
    KubeResourceApplied {
        namespace: String,
        resource: String,
        name: String,
    },
    KubeResourceDeleted {
        namespace: String,
        resource: String,
        name: String,
    },
    PackageInstalled { name: String, version: String },
    PackageRemoved { name: String },
    PythonImported { module: String },
    PythonVariableSet { name: String, value: String },
}

/// Where the text of a command result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    /// Produced by a deterministic emulator.
    #[default]
    Emulated,
    /// Produced by the generative output synthesizer.
    Synthesized,
    /// The synthesizer was absent, failed or timed out.
    Unavailable,
}

/// Outcome of simulating one line of learner input.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub mutations: Vec<Mutation>,
    #[serde(default)]
    pub origin: ResultOrigin,
}

impl CommandResult {
    /// Successful result with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Failed result with the given exit code and stderr.
    #[must_use]
    pub fn error(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            exit_code,
            ..Self::default()
        }
    }

    /// Append one mutation.
    #[must_use]
    pub fn with(mut self, mutation: Mutation) -> Self {
        self.mutations.push(mutation);
        self
    }

    /// Append several mutations.
    #[must_use]
    pub fn with_all(mut self, mutations: impl IntoIterator<Item = Mutation>) -> Self {
        self.mutations.extend(mutations);
        self
    }

    #[must_use]
    pub const fn with_origin(mut self, origin: ResultOrigin) -> Self {
        self.origin = origin;
        self
    }

    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A partial mutation record used by exercises to describe expected changes.
///
/// Every key present in the expectation must be equal in the actual mutation;
/// keys the expectation omits are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeExpectation(pub Map<String, Value>);

impl ChangeExpectation {
    #[must_use]
    pub fn matches(&self, mutation: &Mutation) -> bool {
        let Ok(Value::Object(actual)) = serde_json::to_value(mutation) else {
            return false;
        };
        self.0
            .iter()
            .all(|(key, expected)| actual.get(key) == Some(expected))
    }
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_semantic() -> bool {
    true
}

/// An exercise as authored in a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Exercise {
    pub id: String,
    #[serde(alias = "instruction")]
    pub objective: String,
    /// Ordered expected patterns (commands or outputs).
    #[serde(default)]
    pub expected_patterns: Vec<String>,
    /// Canonical command that solves the exercise.
    #[serde(default)]
    pub expected_command: Option<String>,
    /// Expected state changes compared against applied mutations.
    #[serde(default)]
    pub expected_changes: Vec<ChangeExpectation>,
    #[serde(default)]
    pub hints: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub pass_threshold: Option<f64>,
    /// Whether the generative judge may be consulted.
    #[serde(default = "default_semantic")]
    pub semantic_evaluation: bool,
}

impl Exercise {
    /// Create an exercise with an objective and no expectations.
    #[must_use]
    pub fn new(id: &str, objective: &str) -> Self {
        Self {
            id: id.to_string(),
            objective: objective.to_string(),
            expected_patterns: Vec::new(),
            expected_command: None,
            expected_changes: Vec::new(),
            hints: Vec::new(),
            max_attempts: default_max_attempts(),
            pass_threshold: None,
            semantic_evaluation: default_semantic(),
        }
    }

    #[must_use]
    pub fn expecting(mut self, pattern: &str) -> Self {
        self.expected_patterns.push(pattern.to_string());
        self
    }

    #[must_use]
    pub fn with_hints(mut self, hints: &[&str]) -> Self {
        self.hints = hints.iter().map(|&h| h.to_string()).collect();
        self
    }

    /// Expected patterns followed by the canonical command, if any.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.expected_patterns
            .iter()
            .map(String::as_str)
            .chain(self.expected_command.as_deref())
    }
}

/// Which stage of the validation pipeline decided the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    CaseInsensitive,
    WhitespaceNormalized,
    Contains,
    TokenSet,
    Subset,
    Structural,
    Judge,
    JudgeUnavailable,
    NoMatch,
    EmptyInput,
}

impl std::fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::CaseInsensitive => "case_insensitive",
            Self::WhitespaceNormalized => "whitespace_normalized",
            Self::Contains => "contains",
            Self::TokenSet => "token_set",
            Self::Subset => "subset",
            Self::Structural => "structural",
            Self::Judge => "judge",
            Self::JudgeUnavailable => "judge_unavailable",
            Self::NoMatch => "no_match",
            Self::EmptyInput => "empty_input",
        };
        f.write_str(name)
    }
}

/// Result of judging one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub score: f64,
    pub passed: bool,
    pub feedback: String,
    pub strategy: MatchStrategy,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ValidationResult {
    /// Build a result, deriving `passed` from the threshold.
    #[must_use]
    pub fn scored(score: f64, threshold: f64, feedback: &str, strategy: MatchStrategy) -> Self {
        Self {
            score,
            passed: score >= threshold,
            feedback: feedback.to_string(),
            strategy,
            hint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_mutation_serializes_with_kind_tag() -> TestResult {
        let value = serde_json::to_value(Mutation::DirCreated {
            path: "/project".to_string(),
        })?;
        assert_eq!(value["kind"], "dir_created");
        assert_eq!(value["path"], "/project");
        Ok(())
    }

    #[test]
    fn test_every_mutation_keeps_kind_tag() -> TestResult {
        let s = || "x".to_string();
        let all = vec![
            Mutation::FileCreated { path: s() },
            Mutation::FileWritten { path: s() },
            Mutation::DirCreated { path: s() },
            Mutation::Removed { path: s() },
            Mutation::CwdChanged { path: s() },
            Mutation::EnvSet { name: s(), value: s() },
            Mutation::EnvUnset { name: s() },
            Mutation::GitInitialized { root: s() },
            Mutation::GitStaged { path: s() },
            Mutation::GitCommitted { id: s(), branch: s(), message: s() },
            Mutation::GitBranchCreated { name: s() },
            Mutation::GitBranchSwitched { name: s() },
            Mutation::DockerImageAdded { image: s() },
            Mutation::DockerImageRemoved { image: s() },
            Mutation::ContainerCreated { id: s(), image: s() },
            Mutation::ContainerStarted { id: s() },
            Mutation::ContainerStopped { id: s() },
            Mutation::ContainerRemoved { id: s() },
            Mutation::KubeResourceApplied { namespace: s(), resource: s(), name: s() },
            Mutation::KubeResourceDeleted { namespace: s(), resource: s(), name: s() },
            Mutation::PackageInstalled { name: s(), version: s() },
            Mutation::PackageRemoved { name: s() },
            Mutation::PythonImported { module: s() },
            Mutation::PythonVariableSet { name: s(), value: s() },
        ];
        for mutation in all {
            let value = serde_json::to_value(&mutation)?;
            assert!(value["kind"].is_string(), "{value}");
            let back: Mutation = serde_json::from_value(value)?;
            assert_eq!(back, mutation);
        }
        Ok(())
    }

    #[test]
    fn test_kube_mutation_matches_expectation() -> TestResult {
        let expectation: ChangeExpectation = serde_yml::from_str(
            "kind: kube_resource_applied\nresource: deployment\nname: web\n",
        )?;
        let applied = Mutation::KubeResourceApplied {
            namespace: "default".to_string(),
            resource: "deployment".to_string(),
            name: "web".to_string(),
        };
        assert!(expectation.matches(&applied));
        Ok(())
    }

    #[test]
    fn test_change_expectation_partial_match() -> TestResult {
        let expectation: ChangeExpectation =
            serde_yml::from_str("kind: git_committed\nmessage: init\n")?;
        let commit = Mutation::GitCommitted {
            id: "abc1234".to_string(),
            branch: "main".to_string(),
            message: "init".to_string(),
        };
        assert!(expectation.matches(&commit));

        let other = Mutation::GitCommitted {
            id: "abc1234".to_string(),
            branch: "main".to_string(),
            message: "other".to_string(),
        };
        assert!(!expectation.matches(&other));
        Ok(())
    }

    #[test]
    fn test_exercise_defaults() -> TestResult {
        let yaml = r#"
id: ex-1
instruction: "List all files"
expected_patterns: ["ls -la"]
"#;
        let exercise: Exercise = serde_yml::from_str(yaml)?;
        assert_eq!(exercise.objective, "List all files");
        assert_eq!(exercise.max_attempts, 5);
        assert!(exercise.semantic_evaluation);
        assert!(exercise.pass_threshold.is_none());
        Ok(())
    }

    #[test]
    fn test_exercise_unknown_field_rejected() {
        let yaml = r#"
id: ex-1
objective: "x"
surprise: true
"#;
        let result: Result<Exercise, _> = serde_yml::from_str(yaml);
        assert!(result.is_err_and(|e| e.to_string().contains("unknown field")));
    }

    #[test]
    fn test_patterns_include_expected_command() {
        let mut exercise = Exercise::new("ex", "obj").expecting("a");
        exercise.expected_command = Some("b".to_string());
        let patterns: Vec<&str> = exercise.patterns().collect();
        assert_eq!(patterns, vec!["a", "b"]);
    }

    #[test]
    fn test_scored_threshold_boundary() {
        assert!(ValidationResult::scored(0.7, 0.7, "", MatchStrategy::Judge).passed);
        assert!(!ValidationResult::scored(0.699_999, 0.7, "", MatchStrategy::Judge).passed);
    }
}
