//! Shell builtins and core utilities.

use super::{fail, fs_error};
use crate::router::{ANY_FLAG, Handler, Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::SimulatorState;
use crate::types::{CommandResult, Mutation};
use crate::vfs::{NodeKind, VfsError};
use regex::RegexBuilder;
use std::fmt::Write as _;

const fn grammar(verb: &'static str) -> ToolGrammar {
    ToolGrammar::simple(verb)
}

pub fn register(table: &mut RuleTable) {
    table.add_grammar(ToolGrammar {
        stop_at_positional: true,
        ..grammar("echo")
    });
    table.add_grammar(ToolGrammar {
        flag_aliases: &[("all", "a"), ("recursive", "R")],
        ..grammar("ls")
    });
    table.add_grammar(ToolGrammar {
        flag_aliases: &[("parents", "p"), ("verbose", "v")],
        ..grammar("mkdir")
    });
    table.add_grammar(ToolGrammar {
        flag_aliases: &[("recursive", "r"), ("R", "r"), ("force", "f")],
        ..grammar("rm")
    });
    table.add_grammar(ToolGrammar {
        flag_aliases: &[("recursive", "r"), ("R", "r")],
        ..grammar("cp")
    });
    table.add_grammar(ToolGrammar {
        value_flags: &["n"],
        flag_aliases: &[("lines", "n")],
        ..grammar("head")
    });
    table.add_grammar(ToolGrammar {
        value_flags: &["n"],
        flag_aliases: &[("lines", "n")],
        ..grammar("tail")
    });
    table.add_grammar(ToolGrammar {
        flag_aliases: &[("lines", "l"), ("words", "w"), ("bytes", "c")],
        ..grammar("wc")
    });
    table.add_grammar(ToolGrammar {
        stop_at_positional: false,
        flag_aliases: &[
            ("ignore-case", "i"),
            ("line-number", "n"),
            ("count", "c"),
            ("invert-match", "v"),
            ("recursive", "r"),
            ("R", "r"),
        ],
        ..grammar("grep")
    });
    table.add_grammar(ToolGrammar {
        aliases: &["printenv"],
        ..grammar("env")
    });
    for verb in [
        "pwd", "cd", "cat", "touch", "rmdir", "mv", "export", "unset", "whoami", "true", "false",
        "clear",
    ] {
        table.add_grammar(grammar(verb));
    }

    table.add(rule("echo", &["n", "e", "E"], echo));
    table.add(rule("pwd", &[], pwd));
    table.add(rule("cd", &[], cd));
    table.add(rule("ls", &["a", "A", "l", "R", "h"], ls));
    table.add(rule("cat", &["n"], cat));
    table.add(rule("mkdir", &["p", "v"], mkdir));
    table.add(rule("touch", &[], touch));
    table.add(rule("rm", &["r", "f", "v", "i"], rm));
    table.add(rule("rmdir", &[], rmdir));
    table.add(rule("cp", &["r", "v"], cp));
    table.add(rule("mv", &["f", "v"], mv));
    table.add(rule("export", &[], export));
    table.add(rule("unset", &[], unset));
    table.add(rule("env", &[], env));
    table.add(rule("whoami", &[], whoami));
    table.add(rule("head", &["n"], head));
    table.add(rule("tail", &["n"], tail));
    table.add(rule("wc", &["l", "w", "c"], wc));
    table.add(rule("grep", &["i", "n", "c", "v", "r", "l"], grep));
    table.add(rule("true", &[ANY_FLAG], succeed));
    table.add(rule("false", &[ANY_FLAG], falsy));
    table.add(rule("clear", &[], succeed));
}

const fn rule(verb: &'static str, optional: &'static [&'static str], handler: Handler) -> Rule {
    Rule {
        verb,
        subcommand: None,
        required: &[],
        optional,
        handler,
    }
}

fn succeed(_inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    CommandResult::default().into()
}

fn falsy(_inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    CommandResult::error(1, "").into()
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn echo(inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    let text = inv.args.join(" ");
    let text = if inv.has("e") { unescape(&text) } else { text };
    CommandResult::ok(text).into()
}

fn pwd(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    CommandResult::ok(state.cwd()).into()
}

fn cd(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.len() > 1 {
        return fail(1, "cd: too many arguments");
    }
    let previous = state.cwd().to_string();
    let (target, announce) = match inv.arg(0) {
        None | Some("~") => (state.home().to_string(), false),
        Some("-") => match state.env.get("OLDPWD") {
            Some(old) => (old.clone(), true),
            None => return fail(1, "cd: OLDPWD not set"),
        },
        Some(path) => (path.to_string(), false),
    };
    if let Err(e) = state.vfs.change_dir(&target) {
        return fs_error("cd", &e);
    }
    state.env.insert("OLDPWD".to_string(), previous);
    let cwd = state.cwd().to_string();
    let stdout = if announce { cwd.clone() } else { String::new() };
    CommandResult::ok(stdout)
        .with(Mutation::CwdChanged { path: cwd })
        .into()
}

fn long_entry(state: &SimulatorState, path: &str, name: &str) -> String {
    let (mode, links, size) = match state.vfs.kind(path) {
        Some(NodeKind::Directory) => (
            "drwxr-xr-x",
            2 + state.vfs.list(path).map_or(0, |c| c.len()),
            4096,
        ),
        _ => (
            "-rw-r--r--",
            1,
            state.vfs.read(path).map_or(0, str::len),
        ),
    };
    format!("{mode} {links} user user {size:>5} Jan  1 00:00 {name}")
}

fn child(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

fn list_dir(inv: &Invocation, state: &SimulatorState, path: &str) -> Result<String, VfsError> {
    let mut names: Vec<String> = state
        .vfs
        .list(path)?
        .into_iter()
        .filter(|n| inv.has("a") || inv.has("A") || !n.starts_with('.'))
        .collect();
    if inv.has("a") {
        names = [".".to_string(), "..".to_string()]
            .into_iter()
            .chain(names)
            .collect();
    }
    if !inv.has("l") {
        let separator = if inv.has("1") { "\n" } else { "  " };
        return Ok(names.join(separator));
    }
    let mut out = format!("total {}", names.len() * 4);
    for name in &names {
        let full = match name.as_str() {
            "." => path.to_string(),
            ".." => state.vfs.resolve(&format!("{path}/..")),
            _ => child(path, name),
        };
        let _ = write!(out, "\n{}", long_entry(state, &full, name));
    }
    Ok(out)
}

fn ls(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    // `-1` reads as a number to the flag parser.
    let mut inv = inv.clone();
    let given = inv.args.len();
    inv.args.retain(|a| a != "-1");
    if inv.args.len() != given {
        inv.flags.entry("1".to_string()).or_default();
    }
    let inv = &inv;
    let targets: Vec<&str> = if inv.args.is_empty() {
        vec!["."]
    } else {
        inv.args.iter().map(String::as_str).collect()
    };
    let mut sections = Vec::new();
    let mut errors = Vec::new();
    let headed = targets.len() > 1 || inv.has("R");
    for target in targets {
        let path = state.vfs.resolve(target);
        match state.vfs.kind(&path) {
            None => errors.push(format!(
                "ls: cannot access '{target}': No such file or directory"
            )),
            Some(NodeKind::File) => sections.push(if inv.has("l") {
                long_entry(state, &path, target)
            } else {
                target.to_string()
            }),
            Some(NodeKind::Directory) => {
                let mut dirs = vec![(target.to_string(), path)];
                while let Some((label, dir)) = dirs.pop() {
                    let body = match list_dir(inv, state, &dir) {
                        Ok(body) => body,
                        Err(e) => return fs_error("ls", &e),
                    };
                    sections.push(if headed {
                        format!("{label}:\n{body}")
                    } else {
                        body
                    });
                    if inv.has("R") {
                        let mut subdirs: Vec<(String, String)> = state
                            .vfs
                            .list(&dir)
                            .unwrap_or_default()
                            .into_iter()
                            .filter(|n| inv.has("a") || !n.starts_with('.'))
                            .map(|n| (child(&label, &n), child(&dir, &n)))
                            .filter(|(_, full)| state.vfs.is_dir(full))
                            .collect();
                        subdirs.reverse();
                        dirs.extend(subdirs);
                    }
                }
            }
        }
    }
    let separator = if headed { "\n\n" } else { "\n" };
    let mut result = CommandResult::ok(sections.join(separator));
    if !errors.is_empty() {
        result.stderr = errors.join("\n");
        result.exit_code = 2;
    }
    result.into()
}

fn cat(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return Outcome::Unrecognized;
    }
    let mut out = String::new();
    let mut errors = Vec::new();
    for arg in &inv.args {
        match state.vfs.read(arg) {
            Ok(content) => out.push_str(content),
            Err(e) => errors.push(format!("cat: {e}")),
        }
    }
    let mut text = out.strip_suffix('\n').unwrap_or(&out).to_string();
    if inv.has("n") {
        text = text
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:>6}\t{line}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
    }
    let mut result = CommandResult::ok(text);
    if !errors.is_empty() {
        result.stderr = errors.join("\n");
        result.exit_code = 1;
    }
    result.into()
}

/// Apply `op` to every argument, collecting mutations and errors.
fn each_arg(
    inv: &Invocation,
    tool: &str,
    state: &mut SimulatorState,
    mut op: impl FnMut(&str, &mut SimulatorState) -> Result<Vec<Mutation>, String>,
) -> Outcome {
    if inv.args.is_empty() {
        return fail(1, format!("{tool}: missing operand"));
    }
    let mut result = CommandResult::default();
    let mut errors = Vec::new();
    for arg in &inv.args {
        match op(arg, state) {
            Ok(mutations) => result.mutations.extend(mutations),
            Err(e) => errors.push(format!("{tool}: {e}")),
        }
    }
    if !errors.is_empty() {
        result.stderr = errors.join("\n");
        result.exit_code = 1;
    }
    result.into()
}

fn mkdir(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let recursive = inv.has("p");
    each_arg(inv, "mkdir", state, |arg, state| {
        let created = state
            .vfs
            .mkdir(arg, recursive)
            .map_err(|e| format!("cannot create directory '{arg}': {}", reason(&e)))?;
        Ok(created
            .into_iter()
            .map(|path| Mutation::DirCreated { path })
            .collect())
    })
}

/// The error text without the leading path.
fn reason(error: &VfsError) -> String {
    let text = error.to_string();
    text.rsplit_once(": ").map_or(text.clone(), |(_, r)| r.to_string())
}

fn touch(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    each_arg(inv, "touch", state, |arg, state| {
        if state.vfs.exists(arg) {
            return Ok(Vec::new());
        }
        state
            .vfs
            .touch(arg)
            .map_err(|e| format!("cannot touch '{arg}': {}", reason(&e)))?;
        Ok(vec![Mutation::FileCreated {
            path: state.vfs.resolve(arg),
        }])
    })
}

fn rm(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let recursive = inv.has("r");
    let force = inv.has("f");
    if inv.args.is_empty() && force {
        return CommandResult::default().into();
    }
    each_arg(inv, "rm", state, |arg, state| {
        let path = state.vfs.resolve(arg);
        match state.vfs.kind(&path) {
            None if force => return Ok(Vec::new()),
            None => {
                return Err(format!(
                    "cannot remove '{arg}': No such file or directory"
                ));
            }
            Some(NodeKind::Directory) if !recursive => {
                return Err(format!("cannot remove '{arg}': Is a directory"));
            }
            Some(_) => {}
        }
        state
            .vfs
            .remove(&path, recursive)
            .map_err(|e| format!("cannot remove '{arg}': {}", reason(&e)))?;
        Ok(vec![Mutation::Removed { path }])
    })
}

fn rmdir(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    each_arg(inv, "rmdir", state, |arg, state| {
        let path = state.vfs.resolve(arg);
        if state.vfs.is_file(&path) {
            return Err(format!("failed to remove '{arg}': Not a directory"));
        }
        state
            .vfs
            .remove(&path, false)
            .map_err(|e| format!("failed to remove '{arg}': {}", reason(&e)))?;
        Ok(vec![Mutation::Removed { path }])
    })
}

/// Sources and destination of a `cp`/`mv`, checked for arity.
fn transfer_operands<'a>(inv: &'a Invocation, tool: &str) -> Result<(&'a [String], &'a str), Outcome> {
    match inv.args.split_last() {
        Some((dest, sources)) if !sources.is_empty() => Ok((sources, dest)),
        Some((dest, _)) => Err(fail(
            1,
            format!("{tool}: missing destination file operand after '{dest}'"),
        )),
        None => Err(fail(1, format!("{tool}: missing file operand"))),
    }
}

fn placed(state: &SimulatorState, path: String, existed: bool) -> Mutation {
    if state.vfs.is_dir(&path) {
        Mutation::DirCreated { path }
    } else if existed {
        Mutation::FileWritten { path }
    } else {
        Mutation::FileCreated { path }
    }
}

fn transfer(inv: &Invocation, state: &mut SimulatorState, tool: &str, moving: bool) -> Outcome {
    let (sources, dest) = match transfer_operands(inv, tool) {
        Ok(operands) => operands,
        Err(outcome) => return outcome,
    };
    if sources.len() > 1 && !state.vfs.is_dir(dest) {
        return fail(1, format!("{tool}: target '{dest}' is not a directory"));
    }
    let recursive = inv.has("r");
    let mut result = CommandResult::default();
    let mut errors = Vec::new();
    for source in sources {
        let dest_path = if state.vfs.is_dir(dest) {
            child(&state.vfs.resolve(dest), source.rsplit('/').next().unwrap_or(source))
        } else {
            state.vfs.resolve(dest)
        };
        let existed = state.vfs.is_file(&dest_path);
        let from = state.vfs.resolve(source);
        let outcome = if moving {
            state.vfs.rename(source, dest)
        } else {
            if state.vfs.is_dir(source) && !recursive {
                errors.push(format!("{tool}: -r not specified; omitting directory '{source}'"));
                continue;
            }
            state.vfs.copy(source, dest, recursive)
        };
        match outcome {
            Ok(path) => {
                if moving {
                    result.mutations.push(Mutation::Removed { path: from });
                }
                result.mutations.push(placed(state, path, existed));
            }
            Err(e) => errors.push(format!("{tool}: {e}")),
        }
    }
    if !errors.is_empty() {
        result.stderr = errors.join("\n");
        result.exit_code = 1;
    }
    result.into()
}

fn cp(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    transfer(inv, state, "cp", false)
}

fn mv(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    transfer(inv, state, "mv", true)
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn export(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        let listing: Vec<String> = state
            .env
            .iter()
            .map(|(k, v)| format!("declare -x {k}=\"{v}\""))
            .collect();
        return CommandResult::ok(listing.join("\n")).into();
    }
    let mut assignments = Vec::new();
    for arg in &inv.args {
        let (name, value) = arg.split_once('=').unwrap_or((arg, ""));
        if !valid_name(name) {
            return fail(1, format!("export: `{arg}': not a valid identifier"));
        }
        if arg.contains('=') {
            assignments.push((name.to_string(), value.to_string()));
        }
    }
    let mut result = CommandResult::default();
    for (name, value) in assignments {
        state.env.insert(name.clone(), value.clone());
        result.mutations.push(Mutation::EnvSet { name, value });
    }
    result.into()
}

fn unset(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let mut result = CommandResult::default();
    for name in &inv.args {
        if state.env.remove(name).is_some() {
            result.mutations.push(Mutation::EnvUnset { name: name.clone() });
        }
    }
    result.into()
}

fn env(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.program == "printenv" && !inv.args.is_empty() {
        let values: Vec<&str> = inv
            .args
            .iter()
            .filter_map(|name| state.env.get(name).map(String::as_str))
            .collect();
        let code = i32::from(values.len() != inv.args.len());
        let mut result = CommandResult::ok(values.join("\n"));
        result.exit_code = code;
        return result.into();
    }
    if !inv.args.is_empty() {
        return Outcome::Unrecognized;
    }
    let lines: Vec<String> = state.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    CommandResult::ok(lines.join("\n")).into()
}

fn whoami(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    CommandResult::ok(state.env.get("USER").map_or("user", String::as_str)).into()
}

/// Line count from `-n N` or the legacy `-N` form, plus the file operands.
fn count_and_files(inv: &Invocation) -> Result<(usize, Vec<&str>), String> {
    let mut count = 10;
    if let Some(n) = inv.value("n") {
        count = n
            .trim_start_matches('-')
            .parse()
            .map_err(|_| format!("invalid number of lines: '{n}'"))?;
    }
    let mut files = Vec::new();
    for arg in &inv.args {
        match arg.strip_prefix('-').map(str::parse::<usize>) {
            Some(Ok(n)) => count = n,
            _ => files.push(arg.as_str()),
        }
    }
    Ok((count, files))
}

fn head_tail(inv: &Invocation, state: &SimulatorState, tool: &str, from_end: bool) -> Outcome {
    let (count, files) = match count_and_files(inv) {
        Ok(parsed) => parsed,
        Err(e) => return fail(1, format!("{tool}: {e}")),
    };
    if files.is_empty() {
        return Outcome::Unrecognized;
    }
    let mut sections = Vec::new();
    for file in &files {
        let content = match state.vfs.read(file) {
            Ok(content) => content,
            Err(e) => return fail(1, format!("{tool}: cannot open '{file}' for reading: {}", reason(&e))),
        };
        let lines: Vec<&str> = content.lines().collect();
        let picked = if from_end {
            &lines[lines.len().saturating_sub(count)..]
        } else {
            &lines[..count.min(lines.len())]
        };
        let body = picked.join("\n");
        sections.push(if files.len() > 1 {
            format!("==> {file} <==\n{body}")
        } else {
            body
        });
    }
    CommandResult::ok(sections.join("\n\n")).into()
}

fn head(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    head_tail(inv, state, "head", false)
}

fn tail(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    head_tail(inv, state, "tail", true)
}

fn wc(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return Outcome::Unrecognized;
    }
    let all = !(inv.has("l") || inv.has("w") || inv.has("c"));
    let mut rows = Vec::new();
    for file in &inv.args {
        let content = match state.vfs.read(file) {
            Ok(content) => content,
            Err(e) => return fs_error("wc", &e),
        };
        let mut cols = Vec::new();
        if all || inv.has("l") {
            cols.push(content.matches('\n').count().to_string());
        }
        if all || inv.has("w") {
            cols.push(content.split_whitespace().count().to_string());
        }
        if all || inv.has("c") {
            cols.push(content.len().to_string());
        }
        cols.push(file.clone());
        rows.push(cols.join(" "));
    }
    CommandResult::ok(rows.join("\n")).into()
}

fn grep(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some((pattern, operands)) = inv.args.split_first() else {
        return fail(2, "Usage: grep [OPTION]... PATTERNS [FILE]...");
    };
    if operands.is_empty() {
        return Outcome::Unrecognized;
    }
    let matcher = RegexBuilder::new(pattern)
        .case_insensitive(inv.has("i"))
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(inv.has("i"))
                .build()
        });
    let Ok(matcher) = matcher else {
        return fail(2, format!("grep: invalid pattern '{pattern}'"));
    };

    let mut files = Vec::new();
    for operand in operands {
        match state.vfs.kind(operand) {
            Some(NodeKind::Directory) if inv.has("r") => files.extend(state.vfs.walk_files(operand)),
            Some(NodeKind::Directory) => return fail(2, format!("grep: {operand}: Is a directory")),
            Some(NodeKind::File) => files.push(operand.clone()),
            None => return fail(2, format!("grep: {operand}: No such file or directory")),
        }
    }
    let prefixed = files.len() > 1 || inv.has("r");
    let mut out = Vec::new();
    let mut total = 0;
    for file in &files {
        let content = state.vfs.read(file).unwrap_or_default();
        let mut count = 0;
        for (i, line) in content.lines().enumerate() {
            if matcher.is_match(line) == inv.has("v") {
                continue;
            }
            count += 1;
            if inv.has("c") || inv.has("l") {
                continue;
            }
            let mut entry = String::new();
            if prefixed {
                let _ = write!(entry, "{file}:");
            }
            if inv.has("n") {
                let _ = write!(entry, "{}:", i + 1);
            }
            entry.push_str(line);
            out.push(entry);
        }
        if inv.has("l") && count > 0 {
            out.push(file.clone());
        } else if inv.has("c") {
            out.push(if prefixed {
                format!("{file}:{count}")
            } else {
                count.to_string()
            });
        }
        total += count;
    }
    let mut result = CommandResult::ok(out.join("\n"));
    if total == 0 {
        result.exit_code = 1;
    }
    result.into()
}

#[cfg(test)]
mod tests {
    use crate::router::Router;
    use crate::state::SimulatorState;
    use crate::types::Mutation;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    async fn run(input: &str, state: &SimulatorState) -> (crate::types::CommandResult, SimulatorState) {
        Router::default().execute(input, state).await
    }

    #[tokio::test]
    async fn test_mkdir_cd_touch_chain() -> TestResult {
        let state = SimulatorState::empty();
        let (result, next) = run("mkdir project && cd project && touch main.py", &state).await;
        assert!(result.success());
        assert_eq!(next.cwd(), "/project");
        assert!(next.vfs.is_file("/project/main.py"));
        assert_eq!(
            result.mutations,
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
        Ok(())
    }

    #[tokio::test]
    async fn test_mkdir_p_is_idempotent() {
        let state = SimulatorState::default();
        let (first, once) = run("mkdir -p a/b/c", &state).await;
        assert_eq!(first.mutations.len(), 3);
        let (second, twice) = run("mkdir -p a/b/c", &once).await;
        assert!(second.success());
        assert!(second.mutations.is_empty());
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_mkdir_existing_fails() {
        let state = SimulatorState::default();
        let (result, _) = run("mkdir /tmp", &state).await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "mkdir: cannot create directory '/tmp': File exists");
    }

    #[tokio::test]
    async fn test_ls_variants() {
        let state = SimulatorState::default();
        let (_, state) = run("touch .hidden visible.txt && mkdir src", &state).await;
        let (plain, _) = run("ls", &state).await;
        assert_eq!(plain.stdout, "src  visible.txt");
        let (all, _) = run("ls -a", &state).await;
        assert_eq!(all.stdout, ".  ..  .hidden  src  visible.txt");
        let (la, _) = run("ls -la", &state).await;
        let (al, _) = run("ls -al", &state).await;
        assert_eq!(la.stdout, al.stdout);
        assert!(la.stdout.starts_with("total 20"));
        let (missing, _) = run("ls nope", &state).await;
        assert_eq!(missing.exit_code, 2);
    }

    #[tokio::test]
    async fn test_ls_recursive() {
        let state = SimulatorState::empty();
        let (_, state) = run("mkdir -p a/b && touch a/f.txt a/b/g.txt", &state).await;
        let (result, _) = run("ls -R a", &state).await;
        assert_eq!(result.stdout, "a:\nb  f.txt\n\na/b:\ng.txt");
    }

    #[tokio::test]
    async fn test_ls_one_per_line() {
        let state = SimulatorState::empty();
        let (_, state) = run("touch b.txt a.txt", &state).await;
        let (result, _) = run("ls -1", &state).await;
        assert_eq!(result.stdout, "a.txt\nb.txt");
    }

    #[tokio::test]
    async fn test_cat_missing_file() {
        let (result, _) = run("cat nope.txt", &SimulatorState::default()).await;
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "cat: nope.txt: No such file or directory");
    }

    #[tokio::test]
    async fn test_rm_directory_needs_recursive() {
        let state = SimulatorState::default();
        let (_, state) = run("mkdir -p d/e", &state).await;
        let (result, same) = run("rm d", &state).await;
        assert_eq!(result.stderr, "rm: cannot remove 'd': Is a directory");
        assert_eq!(same, state);
        let (result, gone) = run("rm -rf d", &state).await;
        assert!(result.success());
        assert!(!gone.vfs.exists("d"));
        let (result, _) = run("rm -f never-there", &gone).await;
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_rm_cwd_ancestor_is_busy() {
        let state = SimulatorState::default();
        let (result, next) = run("rm -r /home", &state).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("Device or resource busy"));
        assert!(next.vfs.is_dir("/home/user"));
    }

    #[tokio::test]
    async fn test_cp_and_mv() -> TestResult {
        let state = SimulatorState::default();
        let (_, state) = run("echo data > a.txt && mkdir dir", &state).await;
        let (result, state) = run("cp a.txt b.txt && mv b.txt dir", &state).await;
        assert!(result.success());
        assert_eq!(state.vfs.read("dir/b.txt")?, "data\n");
        assert!(!state.vfs.exists("b.txt"));
        let (result, _) = run("cp dir other", &state).await;
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("-r not specified"));
        Ok(())
    }

    #[tokio::test]
    async fn test_cd_dash_and_home() {
        let state = SimulatorState::default();
        let (_, state) = run("cd /tmp", &state).await;
        let (result, state) = run("cd -", &state).await;
        assert_eq!(result.stdout, "/home/user");
        let (_, state) = run("cd / && cd ~", &state).await;
        assert_eq!(state.cwd(), "/home/user");
    }

    #[tokio::test]
    async fn test_head_tail_wc_grep() {
        let state = SimulatorState::default();
        let (_, state) = run(
            "echo -e 'alpha\\nbeta\\nGamma\\ndelta' > words.txt",
            &state,
        )
        .await;
        let (head, _) = run("head -n 2 words.txt", &state).await;
        assert_eq!(head.stdout, "alpha\nbeta");
        let (tail, _) = run("tail -1 words.txt", &state).await;
        assert_eq!(tail.stdout, "delta");
        let (wc, _) = run("wc -l words.txt", &state).await;
        assert_eq!(wc.stdout, "4 words.txt");
        let (grep, _) = run("grep -in gamma words.txt", &state).await;
        assert_eq!(grep.stdout, "3:Gamma");
        let (none, _) = run("grep zzz words.txt", &state).await;
        assert_eq!(none.exit_code, 1);
    }

    #[tokio::test]
    async fn test_export_and_printenv() {
        let state = SimulatorState::default();
        let (result, state) = run("export EDITOR=vim", &state).await;
        assert_eq!(
            result.mutations,
            vec![Mutation::EnvSet {
                name: "EDITOR".to_string(),
                value: "vim".to_string()
            }]
        );
        let (value, _) = run("printenv EDITOR", &state).await;
        assert_eq!(value.stdout, "vim");
        let (bad, _) = run("export 1X=2", &state).await;
        assert_eq!(bad.exit_code, 1);
        let (_, state) = run("unset EDITOR", &state).await;
        assert!(!state.env.contains_key("EDITOR"));
    }

    #[tokio::test]
    async fn test_emulation_is_deterministic() {
        let state = SimulatorState::default();
        let input = "mkdir -p app && cd app && echo hi > x && ls -la";
        let first = run(input, &state).await;
        let second = run(input, &state).await;
        assert_eq!(first, second);
    }
}
