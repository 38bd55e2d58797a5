//! Simulator state threaded through every command.

use crate::emulators::python::PyValue;
use crate::vfs::Vfs;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// A commit in a simulated repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    pub parent: Option<String>,
    pub branch: String,
    pub message: String,
    pub files: Vec<String>,
}

/// One simulated repository, keyed by its worktree root in [`GitState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRepo {
    pub branch: String,
    /// Branch name to head commit id.
    pub branches: BTreeMap<String, Option<String>>,
    /// Staged path to the file revision that was staged.
    #[serde(default)]
    pub staged: BTreeMap<String, u64>,
    /// Committed path to the file revision at its last commit.
    #[serde(default)]
    pub tracked: BTreeMap<String, u64>,
    #[serde(default)]
    pub commits: Vec<Commit>,
}

impl GitRepo {
    #[must_use]
    pub fn new(branch: &str) -> Self {
        Self {
            branch: branch.to_string(),
            branches: BTreeMap::from([(branch.to_string(), None)]),
            staged: BTreeMap::new(),
            tracked: BTreeMap::new(),
            commits: Vec::new(),
        }
    }

    /// Head commit of the current branch.
    #[must_use]
    pub fn head(&self) -> Option<&Commit> {
        let id = self.branches.get(&self.branch)?.as_deref()?;
        self.commit(id)
    }

    #[must_use]
    pub fn commit(&self, id: &str) -> Option<&Commit> {
        self.commits.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GitState {
    /// Repositories keyed by absolute worktree root.
    #[serde(default)]
    pub repos: BTreeMap<String, GitRepo>,
}

fn within(path: &str, root: &str) -> bool {
    root == "/" || path == root || path.starts_with(&format!("{root}/"))
}

impl GitState {
    /// Root of the innermost repository containing `path`.
    #[must_use]
    pub fn root_for(&self, path: &str) -> Option<String> {
        self.repos
            .keys()
            .filter(|root| within(path, root))
            .max_by_key(|root| root.len())
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub image: String,
    pub name: String,
    pub status: ContainerStatus,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DockerState {
    /// Image reference (`name:tag`) to image id.
    #[serde(default)]
    pub images: BTreeMap<String, String>,
    /// Container id to record.
    #[serde(default)]
    pub containers: BTreeMap<String, Container>,
    /// Source of deterministic ids and names.
    #[serde(default)]
    pub sequence: u64,
}

/// Namespace to resource kind to resource names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeState {
    pub namespaces: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
}

impl Default for KubeState {
    fn default() -> Self {
        Self {
            namespaces: ["default", "kube-system"]
                .into_iter()
                .map(|ns| (ns.to_string(), BTreeMap::new()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PythonState {
    #[serde(default)]
    pub imports: BTreeSet<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, PyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipState {
    /// Installed package name to version.
    pub packages: BTreeMap<String, String>,
}

impl Default for PipState {
    fn default() -> Self {
        Self {
            packages: BTreeMap::from([
                ("pip".to_string(), "24.0".to_string()),
                ("setuptools".to_string(), "69.0.3".to_string()),
            ]),
        }
    }
}

/// The complete emulated environment of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorState {
    pub vfs: Vfs,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub git: GitState,
    #[serde(default)]
    pub docker: DockerState,
    #[serde(default)]
    pub kube: KubeState,
    #[serde(default)]
    pub python: PythonState,
    #[serde(default)]
    pub pip: PipState,
}

pub const HOME: &str = "/home/user";

fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("HOME".to_string(), HOME.to_string()),
        ("USER".to_string(), "user".to_string()),
        ("PATH".to_string(), "/usr/local/bin:/usr/bin:/bin".to_string()),
    ])
}

impl Default for SimulatorState {
    /// A workstation layout: `/home/user` (the cwd) and `/tmp`.
    fn default() -> Self {
        let mut vfs = Vfs::new();
        for dir in [HOME, "/tmp"] {
            // Fresh tree; these cannot collide with anything.
            let _ = vfs.mkdir(dir, true);
        }
        let _ = vfs.change_dir(HOME);
        Self {
            vfs,
            ..Self::empty()
        }
    }
}

impl SimulatorState {
    /// A bare root with the cursor at `/` and the default environment.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            vfs: Vfs::new(),
            env: default_env(),
            git: GitState::default(),
            docker: DockerState::default(),
            kube: KubeState::default(),
            python: PythonState::default(),
            pip: PipState::default(),
        }
    }

    #[must_use]
    pub fn cwd(&self) -> &str {
        self.vfs.cwd()
    }

    #[must_use]
    pub fn home(&self) -> &str {
        self.env.get("HOME").map_or(HOME, String::as_str)
    }

    /// Drop tool references to paths that no longer exist.
    ///
    /// A repository disappears with its `.git` directory; staged and tracked
    /// entries disappear with their files.
    pub fn prune_dangling(&mut self) {
        let vfs = &self.vfs;
        self.git
            .repos
            .retain(|root, _| vfs.is_dir(&format!("{}/.git", root.trim_end_matches('/'))));
        for repo in self.git.repos.values_mut() {
            repo.staged.retain(|path, _| vfs.is_file(path));
            repo.tracked.retain(|path, _| vfs.is_file(path));
        }
    }

    /// Short plain-text description used as context for generative calls.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "cwd: {}", self.cwd());
        if let Ok(entries) = self.vfs.list(self.cwd()) {
            let _ = writeln!(out, "entries: {}", entries.join(" "));
        }
        if let Some(root) = self.git.root_for(self.cwd()) {
            if let Some(repo) = self.git.repos.get(&root) {
                let _ = writeln!(
                    out,
                    "git: repository at {root}, branch {}, {} commit(s)",
                    repo.branch,
                    repo.commits.len()
                );
            }
        }
        if !self.docker.containers.is_empty() {
            let running = self
                .docker
                .containers
                .values()
                .filter(|c| c.status == ContainerStatus::Running)
                .count();
            let _ = writeln!(
                out,
                "docker: {} container(s), {running} running",
                self.docker.containers.len()
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_default_is_workstation_layout() {
        let state = SimulatorState::default();
        assert_eq!(state.cwd(), "/home/user");
        assert!(state.vfs.is_dir("/tmp"));
        assert_eq!(state.env.get("USER").map(String::as_str), Some("user"));
    }

    #[test]
    fn test_empty_is_bare_root() -> TestResult {
        let state = SimulatorState::empty();
        assert_eq!(state.cwd(), "/");
        assert!(state.vfs.list("/")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_root_for_picks_innermost_repo() {
        let mut git = GitState::default();
        git.repos.insert("/work".to_string(), GitRepo::new("main"));
        git.repos
            .insert("/work/vendor/lib".to_string(), GitRepo::new("main"));
        assert_eq!(git.root_for("/work/src").as_deref(), Some("/work"));
        assert_eq!(
            git.root_for("/work/vendor/lib/src").as_deref(),
            Some("/work/vendor/lib")
        );
        assert_eq!(git.root_for("/workshop"), None);
    }

    #[test]
    fn test_prune_dangling_drops_repo_without_git_dir() -> TestResult {
        let mut state = SimulatorState::empty();
        state.vfs.mkdir("/p/.git", true)?;
        state.vfs.touch("/p/a.txt")?;
        let mut repo = GitRepo::new("main");
        repo.staged.insert("/p/a.txt".to_string(), 1);
        state.git.repos.insert("/p".to_string(), repo);

        state.vfs.remove("/p/a.txt", false)?;
        state.prune_dangling();
        assert!(state.git.repos.get("/p").is_some_and(|r| r.staged.is_empty()));

        state.vfs.remove("/p/.git", true)?;
        state.prune_dangling();
        assert!(state.git.repos.is_empty());
        Ok(())
    }

    #[test]
    fn test_state_serde_round_trip() -> TestResult {
        let mut state = SimulatorState::default();
        state.vfs.write("notes.txt", "hi", true)?;
        state.docker.images.insert("nginx:latest".to_string(), "abc".to_string());
        let json = serde_json::to_string(&state)?;
        let restored: SimulatorState = serde_json::from_str(&json)?;
        assert_eq!(restored, state);
        Ok(())
    }
}
