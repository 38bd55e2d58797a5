//! Command routing: parse learner input, dispatch to an emulator rule, or
//! fall back to the output synthesizer.

use crate::emulators;
use crate::generative::{OutputSynthesizer, strip_code_fences, with_timeout};
use crate::state::SimulatorState;
use crate::tokenize::{Connector, Redirect, parse_line};
use crate::types::{CommandResult, Mutation, ResultOrigin};
use crate::vfs::NodeKind;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Marker in [`Rule::optional`] accepting any flag.
pub const ANY_FLAG: &str = "*";

/// How a tool spells its flags.
#[derive(Debug, Clone, Copy)]
pub struct ToolGrammar {
    /// Canonical verb used in rules.
    pub verb: &'static str,
    /// Other names that invoke the tool (`python3`).
    pub aliases: &'static [&'static str],
    /// Whether the first positional word is a subcommand.
    pub subcommands: bool,
    /// Canonical flag names that take a value.
    pub value_flags: &'static [&'static str],
    /// Long (or short) flag name to canonical name.
    pub flag_aliases: &'static [(&'static str, &'static str)],
    /// Stop reading flags at the first positional argument.
    pub stop_at_positional: bool,
}

impl ToolGrammar {
    #[must_use]
    pub const fn simple(verb: &'static str) -> Self {
        Self {
            verb,
            aliases: &[],
            subcommands: false,
            value_flags: &[],
            flag_aliases: &[],
            stop_at_positional: false,
        }
    }

    fn canonical(&self, name: &str) -> String {
        self.flag_aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .map_or(name, |(_, canonical)| canonical)
            .to_string()
    }

    fn takes_value(&self, name: &str) -> bool {
        self.value_flags.contains(&name)
    }

    /// Parse expanded words (verb first) into an invocation.
    #[must_use]
    pub fn parse(&self, words: &[String]) -> Invocation {
        let mut inv = Invocation {
            program: words.first().cloned().unwrap_or_default(),
            verb: self.verb.to_string(),
            ..Invocation::default()
        };
        let mut rest = words.iter().skip(1);
        let mut positional_only = false;

        while let Some(word) = rest.next() {
            if positional_only || !is_flag(word) {
                if self.subcommands && inv.subcommand.is_none() && inv.args.is_empty() {
                    inv.subcommand = Some(word.clone());
                } else {
                    inv.args.push(word.clone());
                    positional_only |= self.stop_at_positional;
                }
                continue;
            }
            if word == "--" {
                positional_only = true;
                continue;
            }
            if let Some(long) = word.strip_prefix("--") {
                let (name, inline) = match long.split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (long, None),
                };
                let name = self.canonical(name);
                let value = if self.takes_value(&name) {
                    inline.or_else(|| rest.next().cloned())
                } else {
                    None
                };
                inv.insert(name, value);
                continue;
            }
            let cluster: Vec<char> = word.chars().skip(1).collect();
            for (i, c) in cluster.iter().enumerate() {
                let name = self.canonical(&c.to_string());
                if self.takes_value(&name) {
                    let tail: String = cluster[i + 1..].iter().collect();
                    let value = if tail.is_empty() {
                        rest.next().cloned()
                    } else {
                        Some(tail)
                    };
                    inv.insert(name, value);
                    break;
                }
                inv.insert(name, None);
            }
        }
        inv
    }
}

fn is_flag(word: &str) -> bool {
    word.len() > 1
        && word.starts_with('-')
        && !word[1..].starts_with(|c: char| c.is_ascii_digit())
}

/// A parsed tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// The verb as typed.
    pub program: String,
    /// Canonical verb of the tool.
    pub verb: String,
    pub subcommand: Option<String>,
    /// Canonical flag name to the values it was given.
    pub flags: BTreeMap<String, Vec<String>>,
    pub args: Vec<String>,
}

impl Invocation {
    fn insert(&mut self, name: String, value: Option<String>) {
        let values = self.flags.entry(name).or_default();
        values.extend(value);
    }

    #[must_use]
    pub fn has(&self, flag: &str) -> bool {
        self.flags.contains_key(flag)
    }

    /// Last value given to a flag.
    #[must_use]
    pub fn value(&self, flag: &str) -> Option<&str> {
        self.flags.get(flag)?.last().map(String::as_str)
    }

    #[must_use]
    pub fn values(&self, flag: &str) -> &[String] {
        self.flags.get(flag).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Human-readable command name, e.g. `git commit`.
    #[must_use]
    pub fn command_name(&self) -> String {
        match &self.subcommand {
            Some(sub) => format!("{} {sub}", self.program),
            None => self.program.clone(),
        }
    }
}

/// What a handler made of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(CommandResult),
    /// The handler does not model this usage; route to the synthesizer.
    Unrecognized,
}

impl From<CommandResult> for Outcome {
    fn from(result: CommandResult) -> Self {
        Self::Done(result)
    }
}

pub type Handler = fn(&Invocation, &mut SimulatorState) -> Outcome;

/// One entry of the dispatch table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub verb: &'static str,
    pub subcommand: Option<&'static str>,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
    pub handler: Handler,
}

impl Rule {
    fn accepts(&self, inv: &Invocation) -> bool {
        if self.verb != inv.verb || self.subcommand != inv.subcommand.as_deref() {
            return false;
        }
        let any = self.optional.contains(&ANY_FLAG);
        self.required.iter().all(|f| inv.has(f))
            && inv.flags.keys().all(|f| {
                any || self.required.contains(&f.as_str()) || self.optional.contains(&f.as_str())
            })
    }
}

/// Grammars and rules of every emulated tool.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    grammars: Vec<ToolGrammar>,
    rules: Vec<Rule>,
}

impl RuleTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in emulator.
    #[must_use]
    pub fn standard() -> Self {
        let mut table = Self::new();
        emulators::shell::register(&mut table);
        emulators::python::register(&mut table);
        emulators::pip::register(&mut table);
        emulators::git::register(&mut table);
        emulators::docker::register(&mut table);
        emulators::kubectl::register(&mut table);
        table
    }

    pub fn add_grammar(&mut self, grammar: ToolGrammar) {
        self.grammars.push(grammar);
    }

    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn grammar(&self, program: &str) -> Option<&ToolGrammar> {
        self.grammars
            .iter()
            .find(|g| g.verb == program || g.aliases.contains(&program))
    }

    /// Every name that invokes an emulated tool.
    pub fn verbs(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.grammars
            .iter()
            .flat_map(|g| std::iter::once(g.verb).chain(g.aliases.iter().copied()))
    }

    /// The most specific rule accepting `inv`; the first registered wins ties.
    #[must_use]
    pub fn lookup(&self, inv: &Invocation) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.accepts(inv))
            .rev()
            .max_by_key(|rule| rule.required.len())
    }
}

fn is_assignment(word: &str) -> Option<(&str, &str)> {
    let (name, value) = word.split_once('=')?;
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then_some((name, value))
}

/// Dispatches learner input against a [`SimulatorState`].
#[derive(Clone)]
pub struct Router {
    table: RuleTable,
    synthesizer: Option<Arc<dyn OutputSynthesizer>>,
    timeout_ms: u64,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("synthesizer", &self.synthesizer.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RuleTable::standard())
    }
}

/// Where a fallback was triggered from, for the degraded message.
struct FallbackContext<'a> {
    text: &'a str,
    program: &'a str,
    known: bool,
    subcommand: Option<&'a str>,
}

impl Router {
    #[must_use]
    pub const fn new(table: RuleTable) -> Self {
        Self {
            table,
            synthesizer: None,
            timeout_ms: 10_000,
        }
    }

    #[must_use]
    pub fn with_synthesizer(
        mut self,
        synthesizer: Arc<dyn OutputSynthesizer>,
        timeout_ms: u64,
    ) -> Self {
        self.synthesizer = Some(synthesizer);
        self.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub const fn table(&self) -> &RuleTable {
        &self.table
    }

    /// Simulate one line of input.
    ///
    /// Returns the result and the state after it; `state` itself is left
    /// untouched. Fallback output never changes the state.
    pub async fn execute(
        &self,
        input: &str,
        state: &SimulatorState,
    ) -> (CommandResult, SimulatorState) {
        let mut state = state.clone();
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return (CommandResult::default(), state);
        }

        if emulators::python::is_statement(trimmed) {
            let mut scratch = state.clone();
            return match emulators::python::run_snippet(trimmed, &mut scratch) {
                Outcome::Done(result) => (result, scratch),
                Outcome::Unrecognized => {
                    let ctx = FallbackContext {
                        text: trimmed,
                        program: "python",
                        known: true,
                        subcommand: None,
                    };
                    (self.fallback(&ctx, &state).await, state)
                }
            };
        }

        let line = match parse_line(trimmed) {
            Ok(line) => line,
            Err(e) => return (CommandResult::error(2, format!("bash: {e}")), state),
        };
        if line.unsupported.is_some() {
            let program = line
                .segments
                .first()
                .and_then(|s| s.words.first())
                .map(|w| w.expand(&state.env, state.home()))
                .unwrap_or_default();
            let ctx = FallbackContext {
                text: trimmed,
                program: &program,
                known: self.table.grammar(&program).is_some(),
                subcommand: None,
            };
            return (self.fallback(&ctx, &state).await, state);
        }

        let mut combined = CommandResult::default();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for segment in &line.segments {
            let skip = match segment.connector {
                Some(Connector::And) => combined.exit_code != 0,
                Some(Connector::Or) => combined.exit_code == 0,
                Some(Connector::Sequence) | None => false,
            };
            if skip {
                continue;
            }
            let words: Vec<String> = segment
                .words
                .iter()
                .map(|w| w.expand(&state.env, state.home()))
                .collect();
            let text = segment
                .words
                .iter()
                .map(crate::tokenize::Word::literal)
                .collect::<Vec<_>>()
                .join(" ");
            let redirect = segment
                .redirect
                .as_ref()
                .map(|r| (r.target.expand(&state.env, state.home()), r));
            let result = self
                .run_segment(&words, &text, redirect, &mut state)
                .await;
            if !result.stdout.is_empty() {
                stdout.push(result.stdout);
            }
            if !result.stderr.is_empty() {
                stderr.push(result.stderr);
            }
            combined.exit_code = result.exit_code;
            combined.mutations.extend(result.mutations);
            combined.origin = combined.origin.max(result.origin);
        }
        combined.stdout = stdout.join("\n");
        combined.stderr = stderr.join("\n");
        (combined, state)
    }

    async fn run_segment(
        &self,
        words: &[String],
        text: &str,
        redirect: Option<(String, &Redirect)>,
        state: &mut SimulatorState,
    ) -> CommandResult {
        if words.iter().all(|w| is_assignment(w).is_some()) {
            let mut result = CommandResult::default();
            for (name, value) in words.iter().filter_map(|w| is_assignment(w)) {
                state.env.insert(name.to_string(), value.to_string());
                result.mutations.push(Mutation::EnvSet {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            return result;
        }

        let program = words.first().map_or("", String::as_str);
        let Some(grammar) = self.table.grammar(program) else {
            let ctx = FallbackContext {
                text,
                program,
                known: false,
                subcommand: None,
            };
            return self.fallback(&ctx, state).await;
        };
        let inv = grammar.parse(words);
        let fallback_ctx = FallbackContext {
            text,
            program,
            known: true,
            subcommand: inv.subcommand.as_deref(),
        };
        let Some(rule) = self.table.lookup(&inv) else {
            return self.fallback(&fallback_ctx, state).await;
        };

        if let Some((target, _)) = &redirect {
            if let Err(e) = check_redirect(target, state) {
                return CommandResult::error(1, format!("bash: {e}"));
            }
        }

        debug!(verb = %inv.verb, subcommand = ?inv.subcommand, "dispatching to emulator");
        let mut scratch = state.clone();
        let mut result = match (rule.handler)(&inv, &mut scratch) {
            Outcome::Done(result) => result,
            Outcome::Unrecognized => return self.fallback(&fallback_ctx, state).await,
        };
        *state = scratch;
        if let Some((target, r)) = redirect {
            apply_redirect(&target, r.append, &mut result, state);
        }
        state.prune_dangling();
        result
    }

    async fn fallback(&self, ctx: &FallbackContext<'_>, state: &SimulatorState) -> CommandResult {
        let Some(synth) = &self.synthesizer else {
            debug!(input = ctx.text, "no output synthesizer configured");
            return degraded(ctx);
        };
        debug!(input = ctx.text, "routing to output synthesizer");
        match with_timeout(synth.synthesize(ctx.text, state), self.timeout_ms).await {
            Ok(raw) => parse_synthesized(&raw),
            Err(e) => {
                warn!(error = %e, input = ctx.text, "output synthesizer unavailable");
                degraded(ctx)
            }
        }
    }
}

fn degraded(ctx: &FallbackContext<'_>) -> CommandResult {
    let result = if ctx.known {
        let name = ctx
            .subcommand
            .map_or_else(|| ctx.program.to_string(), |sub| format!("{} {sub}", ctx.program));
        CommandResult::error(1, format!("{name}: not available in this environment"))
    } else {
        CommandResult::error(127, format!("{}: command not found", ctx.program))
    };
    result.with_origin(ResultOrigin::Unavailable)
}

/// Turn synthesizer text into a result, honouring an `Exit Code: N` header.
fn parse_synthesized(raw: &str) -> CommandResult {
    let body = strip_code_fences(raw);
    let (code, text) = match body.split_once('\n') {
        Some((first, rest)) => match exit_code_header(first) {
            Some(code) => (code, rest.trim()),
            None => (0, body),
        },
        None => exit_code_header(body).map_or((0, body), |code| (code, "")),
    };
    let result = if code == 0 {
        CommandResult::ok(text)
    } else {
        CommandResult::error(code, text)
    };
    result.with_origin(ResultOrigin::Synthesized)
}

fn exit_code_header(line: &str) -> Option<i32> {
    let (label, value) = line.split_once(':')?;
    label
        .trim()
        .eq_ignore_ascii_case("exit code")
        .then(|| value.trim().parse().ok())
        .flatten()
}

fn check_redirect(target: &str, state: &SimulatorState) -> Result<(), crate::vfs::VfsError> {
    let path = state.vfs.resolve(target);
    if state.vfs.kind(&path) == Some(NodeKind::Directory) {
        return Err(crate::vfs::VfsError::TypeMismatch {
            path: target.to_string(),
            found: NodeKind::Directory,
        });
    }
    let parent = path.rsplit_once('/').map_or("/", |(p, _)| if p.is_empty() { "/" } else { p });
    if state.vfs.is_dir(parent) {
        Ok(())
    } else {
        Err(crate::vfs::VfsError::PathNotFound(target.to_string()))
    }
}

fn apply_redirect(target: &str, append: bool, result: &mut CommandResult, state: &mut SimulatorState) {
    let path = state.vfs.resolve(target);
    let mut content = std::mem::take(&mut result.stdout);
    if !content.is_empty() {
        content.push('\n');
    }
    let written = if append {
        state.vfs.append(&path, &content)
    } else {
        state.vfs.write(&path, &content, true)
    };
    match written {
        Ok(true) => result.mutations.push(Mutation::FileCreated { path }),
        Ok(false) => result.mutations.push(Mutation::FileWritten { path }),
        Err(e) => {
            result.stderr = format!("bash: {e}");
            result.exit_code = 1;
        }
    }
}

/// Names of every emulated verb plus common CLI verbs.
#[must_use]
pub fn default_command_verbs() -> BTreeSet<String> {
    const COMMON: &[&str] = &[
        "sudo", "apt", "apt-get", "brew", "npm", "npx", "yarn", "node", "cargo", "rustc", "go",
        "make", "curl", "wget", "ssh", "scp", "chmod", "chown", "find", "sed", "awk", "sort",
        "uniq", "tar", "zip", "unzip", "less", "more", "vim", "nano", "man", "which", "ps",
        "kill", "top", "helm", "terraform", "docker-compose", "minikube", "virtualenv", "conda",
    ];
    RuleTable::standard()
        .verbs()
        .chain(COMMON.iter().copied())
        .map(ToString::to_string)
        .collect()
}
