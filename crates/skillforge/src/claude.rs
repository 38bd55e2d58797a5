//! Generative backend that shells out to the Claude CLI.

use futures::future::BoxFuture;
use skillforge_core::generative::{
    FailedAttempt, JudgeRequest, hint_prompt, judge_prompt, synthesis_prompt,
};
use skillforge_core::{GenerativeError, Judge, OutputSynthesizer, SimulatorState};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs `claude -p` once per request.
///
/// Deadlines are enforced by the caller; dropping the future kills the
/// child process.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    program: String,
    model: String,
}

impl ClaudeCli {
    #[must_use]
    pub fn new(model: &str) -> Self {
        Self {
            program: "claude".to_string(),
            model: model.to_string(),
        }
    }

    #[cfg(test)]
    fn with_program(mut self, program: &str) -> Self {
        self.program = program.to_string();
        self
    }

    async fn ask(&self, prompt: String) -> Result<String, GenerativeError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(&prompt)
            .arg("--model")
            .arg(&self.model)
            .arg("--max-turns")
            .arg("1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.program, model = %self.model, "spawning model CLI");
        let child = cmd.spawn().map_err(|e| {
            GenerativeError::Transport(format!("failed to spawn {}: {e}", self.program))
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerativeError::Transport(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerativeError::Transport(format!(
                "exit code: {:?}: {}",
                output.status.code(),
                truncate(stderr.trim(), 200)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl OutputSynthesizer for ClaudeCli {
    fn synthesize<'a>(
        &'a self,
        input: &'a str,
        state: &'a SimulatorState,
    ) -> BoxFuture<'a, Result<String, GenerativeError>> {
        Box::pin(self.ask(synthesis_prompt(input, state)))
    }
}

impl Judge for ClaudeCli {
    fn judge<'a>(
        &'a self,
        request: JudgeRequest<'a>,
    ) -> BoxFuture<'a, Result<String, GenerativeError>> {
        Box::pin(self.ask(judge_prompt(&request)))
    }

    fn hint<'a>(
        &'a self,
        objective: &'a str,
        history: &'a [FailedAttempt],
    ) -> BoxFuture<'a, Result<String, GenerativeError>> {
        Box::pin(self.ask(hint_prompt(objective, history)))
    }
}

/// Truncate on a char boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let end = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_len)
        .last()
        .unwrap_or(0);
    format!("{}...[truncated]", &s[..end])
}
