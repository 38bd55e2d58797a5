//! Version control emulation.
//!
//! Repositories live in [`GitState`](crate::state::GitState) keyed by their
//! worktree root; the `.git` directory in the VFS marks them on disk. Branch
//! switches move the branch pointer only, the worktree is shared.

use super::{fail, short_hash};
use crate::router::{Handler, Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::{Commit, GitRepo, SimulatorState};
use crate::types::{CommandResult, Mutation};
use std::fmt::Write as _;

pub const NOT_A_REPO: &str =
    "fatal: not a git repository (or any of the parent directories): .git";

const DEFAULT_BRANCH: &str = "main";

pub fn register(table: &mut RuleTable) {
    table.add_grammar(ToolGrammar {
        verb: "git",
        aliases: &[],
        subcommands: true,
        value_flags: &["m", "b", "c", "n"],
        flag_aliases: &[
            ("message", "m"),
            ("all", "a"),
            ("create", "c"),
            ("max-count", "n"),
            ("version", "V"),
        ],
        stop_at_positional: false,
    });
    table.add(rule(None, &["V"], &[], version));
    table.add(rule(Some("init"), &[], &["q"], init));
    table.add(rule(Some("status"), &[], &["s"], status));
    table.add(rule(Some("add"), &[], &["A", "a", "v"], add));
    table.add(rule(Some("commit"), &["m"], &["a"], commit));
    table.add(rule(Some("commit"), &[], &["a"], commit_without_message));
    table.add(rule(Some("log"), &[], &["oneline", "n"], log));
    table.add(rule(Some("branch"), &[], &[], branch));
    table.add(rule(Some("checkout"), &[], &[], checkout));
    table.add(rule(Some("checkout"), &["b"], &[], checkout_new));
    table.add(rule(Some("switch"), &[], &[], switch));
    table.add(rule(Some("switch"), &["c"], &[], checkout_new));
    table.add(rule(Some("clone"), &[], &["q"], clone));
}

const fn rule(
    subcommand: Option<&'static str>,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    handler: Handler,
) -> Rule {
    Rule {
        verb: "git",
        subcommand,
        required,
        optional,
        handler,
    }
}

fn join(root: &str, name: &str) -> String {
    if root == "/" {
        format!("/{name}")
    } else {
        format!("{root}/{name}")
    }
}

/// Path relative to the repository root.
fn relative<'a>(root: &str, path: &'a str) -> &'a str {
    if root == "/" {
        return path.trim_start_matches('/');
    }
    path.strip_prefix(root)
        .map_or(path, |rest| rest.trim_start_matches('/'))
}

/// The repository containing the cwd, or the exit-128 failure.
fn current_root(state: &SimulatorState) -> Result<String, Outcome> {
    state
        .git
        .root_for(state.cwd())
        .ok_or_else(|| fail(128, NOT_A_REPO))
}

/// Files under `dir` that belong to the repository at `root`, excluding
/// `.git` and nested repositories.
fn files_under(state: &SimulatorState, dir: &str, root: &str) -> Vec<String> {
    state
        .vfs
        .walk_files(dir)
        .into_iter()
        .filter(|path| !path.contains("/.git/"))
        .filter(|path| state.git.root_for(path).as_deref() == Some(root))
        .collect()
}

fn worktree(state: &SimulatorState, root: &str) -> Vec<String> {
    files_under(state, root, root)
}

fn version(_inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    CommandResult::ok("git version 2.43.0").into()
}

fn init(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = state.vfs.resolve(inv.arg(0).unwrap_or("."));
    let git_dir = join(&root, ".git");
    if state.git.repos.contains_key(&root) && state.vfs.is_dir(&git_dir) {
        return CommandResult::ok(format!(
            "Reinitialized existing Git repository in {git_dir}/"
        ))
        .into();
    }
    if state.vfs.is_file(&root) {
        return fail(128, format!("fatal: cannot mkdir {root}: File exists"));
    }
    let created = match state.vfs.mkdir(&git_dir, true) {
        Ok(created) => created,
        Err(e) => return fail(128, format!("fatal: cannot mkdir {root}: {e}")),
    };
    let head = join(&git_dir, "HEAD");
    let _ = state
        .vfs
        .write(&head, &format!("ref: refs/heads/{DEFAULT_BRANCH}\n"), true);
    state
        .git
        .repos
        .insert(root.clone(), GitRepo::new(DEFAULT_BRANCH));
    let stdout = if inv.has("q") {
        String::new()
    } else {
        format!("Initialized empty Git repository in {git_dir}/")
    };
    CommandResult::ok(stdout)
        .with_all(created.into_iter().map(|path| Mutation::DirCreated { path }))
        .with(Mutation::GitInitialized { root })
        .into()
}

#[derive(Default)]
struct Status {
    staged_new: Vec<String>,
    staged_modified: Vec<String>,
    modified: Vec<String>,
    untracked: Vec<String>,
}

fn classify(state: &SimulatorState, root: &str, repo: &GitRepo) -> Status {
    let mut status = Status::default();
    for path in worktree(state, root) {
        let revision = state.vfs.revision(&path);
        let name = relative(root, &path).to_string();
        if let Some(staged) = repo.staged.get(&path) {
            if repo.tracked.contains_key(&path) {
                status.staged_modified.push(name.clone());
            } else {
                status.staged_new.push(name.clone());
            }
            if revision != Some(*staged) {
                status.modified.push(name);
            }
        } else if let Some(tracked) = repo.tracked.get(&path) {
            if revision != Some(*tracked) {
                status.modified.push(name);
            }
        } else {
            status.untracked.push(name);
        }
    }
    status
}

fn status(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let Some(repo) = state.git.repos.get(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let status = classify(state, &root, repo);

    if inv.has("s") {
        let mut lines = Vec::new();
        lines.extend(status.staged_new.iter().map(|p| format!("A  {p}")));
        lines.extend(status.staged_modified.iter().map(|p| format!("M  {p}")));
        lines.extend(status.modified.iter().map(|p| format!(" M {p}")));
        lines.extend(status.untracked.iter().map(|p| format!("?? {p}")));
        return CommandResult::ok(lines.join("\n")).into();
    }

    let mut out = format!("On branch {}", repo.branch);
    if repo.commits.is_empty() {
        out.push_str("\n\nNo commits yet");
    }
    if !(status.staged_new.is_empty() && status.staged_modified.is_empty()) {
        out.push_str("\n\nChanges to be committed:\n  (use \"git restore --staged <file>...\" to unstage)");
        for path in &status.staged_new {
            let _ = write!(out, "\n\tnew file:   {path}");
        }
        for path in &status.staged_modified {
            let _ = write!(out, "\n\tmodified:   {path}");
        }
    }
    if !status.modified.is_empty() {
        out.push_str("\n\nChanges not staged for commit:\n  (use \"git add <file>...\" to update what will be committed)");
        for path in &status.modified {
            let _ = write!(out, "\n\tmodified:   {path}");
        }
    }
    if !status.untracked.is_empty() {
        out.push_str("\n\nUntracked files:\n  (use \"git add <file>...\" to include in what will be committed)");
        for path in &status.untracked {
            let _ = write!(out, "\n\t{path}");
        }
    }
    let nothing_staged = status.staged_new.is_empty() && status.staged_modified.is_empty();
    if nothing_staged && status.modified.is_empty() && status.untracked.is_empty() {
        out.push_str(if repo.commits.is_empty() {
            "\n\nnothing to commit (create/copy files and use \"git add\" to track)"
        } else {
            "\nnothing to commit, working tree clean"
        });
    }
    CommandResult::ok(out).into()
}

fn add(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    if inv.args.is_empty() && !inv.has("A") {
        return CommandResult::error(
            0,
            "Nothing specified, nothing added.\nhint: Maybe you wanted to say 'git add .'?",
        )
        .into();
    }

    let mut files = Vec::new();
    if inv.has("A") && inv.args.is_empty() {
        files = worktree(state, &root);
    }
    for arg in &inv.args {
        let path = state.vfs.resolve(arg);
        if state.git.root_for(&path).as_deref() != Some(root.as_str()) {
            return fail(
                128,
                format!("fatal: {arg}: '{arg}' is outside repository at '{root}'"),
            );
        }
        if state.vfs.is_dir(&path) {
            files.extend(files_under(state, &path, &root));
        } else if state.vfs.is_file(&path) && !path.contains("/.git/") {
            files.push(path);
        } else {
            return fail(
                128,
                format!("fatal: pathspec '{arg}' did not match any files"),
            );
        }
    }
    files.sort();
    files.dedup();

    let Some(repo) = state.git.repos.get_mut(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let mut result = CommandResult::default();
    for path in files {
        let Some(revision) = state.vfs.revision(&path) else {
            continue;
        };
        let unchanged = repo.tracked.get(&path) == Some(&revision);
        if unchanged || repo.staged.get(&path) == Some(&revision) {
            continue;
        }
        repo.staged.insert(path.clone(), revision);
        result.mutations.push(Mutation::GitStaged { path });
    }
    result.into()
}

fn commit_without_message(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if let Err(outcome) = current_root(state) {
        return outcome;
    }
    fail(1, "Aborting commit due to empty commit message.")
}

fn commit(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let message = inv.values("m").join("\n\n");
    if message.trim().is_empty() {
        return fail(1, "Aborting commit due to empty commit message.");
    }
    let auto_stage: Vec<(String, u64)> = match state.git.repos.get(&root) {
        Some(repo) if inv.has("a") => repo
            .tracked
            .iter()
            .filter_map(|(path, tracked)| {
                let revision = state.vfs.revision(path)?;
                (revision != *tracked).then(|| (path.clone(), revision))
            })
            .collect(),
        _ => Vec::new(),
    };
    let status = match state.git.repos.get(&root) {
        Some(repo) => classify(state, &root, repo),
        None => return fail(128, NOT_A_REPO),
    };
    let Some(repo) = state.git.repos.get_mut(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let mut result = CommandResult::default();
    for (path, revision) in auto_stage {
        repo.staged.insert(path.clone(), revision);
        result.mutations.push(Mutation::GitStaged { path });
    }
    if repo.staged.is_empty() {
        let mut out = format!("On branch {}", repo.branch);
        if !status.modified.is_empty() {
            out.push_str("\nno changes added to commit (use \"git add\" and/or \"git commit -a\")");
        } else if !status.untracked.is_empty() {
            out.push_str("\nnothing added to commit but untracked files present (use \"git add\" to track)");
        } else {
            out.push_str("\nnothing to commit, working tree clean");
        }
        let mut result = CommandResult::ok(out);
        result.exit_code = 1;
        return result.into();
    }

    let parent = repo.head().map(|c| c.id.clone());
    let files: Vec<String> = repo.staged.keys().cloned().collect();
    let mut seed = format!(
        "{root}\0{}\0{}\0{message}\0{}",
        repo.branch,
        parent.as_deref().unwrap_or_default(),
        repo.commits.len()
    );
    for (path, revision) in &repo.staged {
        let _ = write!(seed, "\0{path}:{revision}");
    }
    let id = short_hash(&seed, 7);
    let staged = std::mem::take(&mut repo.staged);
    repo.tracked.extend(staged);
    repo.commits.push(Commit {
        id: id.clone(),
        parent: parent.clone(),
        branch: repo.branch.clone(),
        message: message.clone(),
        files: files.clone(),
    });
    repo.branches.insert(repo.branch.clone(), Some(id.clone()));

    let root_marker = if parent.is_none() { " (root-commit)" } else { "" };
    let count = files.len();
    let noun = if count == 1 { "file" } else { "files" };
    let subject = message.lines().next().unwrap_or_default();
    result.stdout = format!(
        "[{}{root_marker} {id}] {subject}\n {count} {noun} changed",
        repo.branch
    );
    result.mutations.push(Mutation::GitCommitted {
        id,
        branch: repo.branch.clone(),
        message,
    });
    result.into()
}

fn log(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let Some(repo) = state.git.repos.get(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let Some(head) = repo.head() else {
        return fail(
            128,
            format!(
                "fatal: your current branch '{}' does not have any commits yet",
                repo.branch
            ),
        );
    };
    let limit = match inv.value("n").map(str::parse::<usize>) {
        None => usize::MAX,
        Some(Ok(n)) => n,
        Some(Err(_)) => return fail(128, "fatal: '-n' requires a numeric value"),
    };

    let mut entries = Vec::new();
    let mut cursor = Some(head);
    while let Some(commit) = cursor {
        if entries.len() >= limit {
            break;
        }
        let decoration = if commit.id == head.id {
            format!(" (HEAD -> {})", repo.branch)
        } else {
            String::new()
        };
        entries.push(if inv.has("oneline") {
            format!(
                "{}{decoration} {}",
                commit.id,
                commit.message.lines().next().unwrap_or_default()
            )
        } else {
            let body: Vec<String> = commit.message.lines().map(|l| format!("    {l}")).collect();
            format!(
                "commit {}{decoration}\nAuthor: user <user@example.com>\nDate:   Mon Jan 1 00:00:00 2024 +0000\n\n{}",
                commit.id,
                body.join("\n")
            )
        });
        cursor = commit.parent.as_deref().and_then(|id| repo.commit(id));
    }
    let separator = if inv.has("oneline") { "\n" } else { "\n\n" };
    CommandResult::ok(entries.join(separator)).into()
}

fn branch(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let Some(repo) = state.git.repos.get_mut(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let Some(name) = inv.arg(0) else {
        let lines: Vec<String> = repo
            .branches
            .iter()
            .filter(|(_, head)| head.is_some())
            .map(|(name, _)| {
                let marker = if *name == repo.branch { '*' } else { ' ' };
                format!("{marker} {name}")
            })
            .collect();
        return CommandResult::ok(lines.join("\n")).into();
    };
    if repo.branches.contains_key(name) {
        return fail(128, format!("fatal: a branch named '{name}' already exists"));
    }
    let Some(head) = repo.head().map(|c| c.id.clone()) else {
        return fail(
            128,
            format!("fatal: not a valid object name: '{}'", repo.branch),
        );
    };
    repo.branches.insert(name.to_string(), Some(head));
    CommandResult::default()
        .with(Mutation::GitBranchCreated {
            name: name.to_string(),
        })
        .into()
}

fn switch_to(inv: &Invocation, state: &mut SimulatorState, missing: &str) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let Some(repo) = state.git.repos.get_mut(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let Some(name) = inv.arg(0) else {
        return Outcome::Unrecognized;
    };
    if name == repo.branch {
        return CommandResult::ok(format!("Already on '{name}'")).into();
    }
    if !repo.branches.contains_key(name) {
        let code = if missing.starts_with("fatal") { 128 } else { 1 };
        return fail(code, missing.replace("{}", name));
    }
    repo.branch = name.to_string();
    CommandResult::ok(format!("Switched to branch '{name}'"))
        .with(Mutation::GitBranchSwitched {
            name: name.to_string(),
        })
        .into()
}

fn checkout(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    switch_to(
        inv,
        state,
        "error: pathspec '{}' did not match any file(s) known to git",
    )
}

fn switch(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    switch_to(inv, state, "fatal: invalid reference: {}")
}

/// `checkout -b NAME` and `switch -c NAME`.
fn checkout_new(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let root = match current_root(state) {
        Ok(root) => root,
        Err(outcome) => return outcome,
    };
    let Some(repo) = state.git.repos.get_mut(&root) else {
        return fail(128, NOT_A_REPO);
    };
    let Some(name) = inv.value("b").or_else(|| inv.value("c")) else {
        return fail(129, "error: switch requires a value");
    };
    if repo.branches.contains_key(name) {
        return fail(128, format!("fatal: a branch named '{name}' already exists"));
    }
    let head = repo.head().map(|c| c.id.clone());
    if head.is_none() {
        // An unborn branch has no ref to leave behind.
        let unborn = repo.branch.clone();
        repo.branches.remove(&unborn);
    }
    repo.branches.insert(name.to_string(), head);
    repo.branch = name.to_string();
    CommandResult::ok(format!("Switched to a new branch '{name}'"))
        .with(Mutation::GitBranchCreated {
            name: name.to_string(),
        })
        .with(Mutation::GitBranchSwitched {
            name: name.to_string(),
        })
        .into()
}

fn clone(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(url) = inv.arg(0) else {
        return fail(129, "fatal: You must specify a repository to clone.");
    };
    let name = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or(url)
        .trim_end_matches(".git")
        .to_string();
    let dir = inv.arg(1).unwrap_or(&name).to_string();
    let root = state.vfs.resolve(&dir);
    if state.vfs.is_file(&root)
        || state.vfs.list(&root).is_ok_and(|entries| !entries.is_empty())
    {
        return fail(
            128,
            format!("fatal: destination path '{dir}' already exists and is not an empty directory."),
        );
    }
    let git_dir = join(&root, ".git");
    let created = match state.vfs.mkdir(&git_dir, true) {
        Ok(created) => created,
        Err(e) => return fail(128, format!("fatal: could not create work tree dir '{dir}': {e}")),
    };
    let readme = join(&root, "README.md");
    let _ = state.vfs.write(&join(&git_dir, "HEAD"), "ref: refs/heads/main\n", true);
    if let Err(e) = state.vfs.write(&readme, &format!("# {name}\n"), true) {
        return fail(128, format!("fatal: {e}"));
    }
    let revision = state.vfs.revision(&readme).unwrap_or(1);

    let mut repo = GitRepo::new(DEFAULT_BRANCH);
    let id = short_hash(&format!("clone\0{url}"), 7);
    repo.tracked.insert(readme.clone(), revision);
    repo.commits.push(Commit {
        id: id.clone(),
        parent: None,
        branch: DEFAULT_BRANCH.to_string(),
        message: "Initial commit".to_string(),
        files: vec![readme.clone()],
    });
    repo.branches.insert(DEFAULT_BRANCH.to_string(), Some(id));
    state.git.repos.insert(root.clone(), repo);

    CommandResult::ok(format!("Cloning into '{dir}'..."))
        .with_all(created.into_iter().map(|path| Mutation::DirCreated { path }))
        .with(Mutation::GitInitialized { root })
        .with(Mutation::FileCreated { path: readme })
        .into()
}
