//! Python package manager emulation.

use super::fail;
use crate::router::{Handler, Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::SimulatorState;
use crate::types::{CommandResult, Mutation};
use std::fmt::Write as _;

const GRAMMAR: ToolGrammar = ToolGrammar {
    verb: "pip",
    aliases: &["pip3"],
    subcommands: true,
    value_flags: &["r"],
    flag_aliases: &[
        ("requirement", "r"),
        ("yes", "y"),
        ("version", "V"),
        ("upgrade", "U"),
        ("quiet", "q"),
    ],
    stop_at_positional: false,
};

const SITE_PACKAGES: &str = "/usr/lib/python3.12/site-packages";

/// Latest versions of commonly installed packages.
const KNOWN_VERSIONS: &[(&str, &str)] = &[
    ("black", "24.1.1"),
    ("django", "5.0.1"),
    ("fastapi", "0.109.0"),
    ("flask", "3.0.1"),
    ("httpx", "0.26.0"),
    ("matplotlib", "3.8.2"),
    ("numpy", "1.26.3"),
    ("pandas", "2.2.0"),
    ("pydantic", "2.5.3"),
    ("pytest", "7.4.4"),
    ("python-dotenv", "1.0.1"),
    ("pyyaml", "6.0.1"),
    ("requests", "2.31.0"),
    ("ruff", "0.1.14"),
    ("scikit-learn", "1.4.0"),
    ("sqlalchemy", "2.0.25"),
    ("uvicorn", "0.27.0"),
];

pub fn register(table: &mut RuleTable) {
    table.add_grammar(GRAMMAR);
    table.add(rule(Some("install"), &[], &["r", "U", "q", "user"], install));
    table.add(rule(Some("uninstall"), &[], &["y", "q"], uninstall));
    table.add(rule(Some("list"), &[], &[], list));
    table.add(rule(Some("freeze"), &[], &[], freeze));
    table.add(rule(Some("show"), &[], &[], show));
    table.add(rule(None, &["V"], &[], version));
}

const fn rule(
    subcommand: Option<&'static str>,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    handler: Handler,
) -> Rule {
    Rule {
        verb: "pip",
        subcommand,
        required,
        optional,
        handler,
    }
}

/// Run a pip command line (`pip` first) outside the router, as
/// `python -m pip` does.
pub fn dispatch(words: &[String], state: &mut SimulatorState) -> Outcome {
    let mut table = RuleTable::new();
    register(&mut table);
    let inv = GRAMMAR.parse(words);
    match table.lookup(&inv) {
        Some(rule) => (rule.handler)(&inv, state),
        None => Outcome::Unrecognized,
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

fn version(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let pip = state.pip.packages.get("pip").map_or("24.0", String::as_str);
    CommandResult::ok(format!("pip {pip} from {SITE_PACKAGES}/pip (python 3.12)")).into()
}

/// Split `name==1.0` (or `>=`, `~=`) into name and the pinned version.
fn requirement(spec: &str) -> Option<(String, Option<String>)> {
    let spec = spec.split(';').next().unwrap_or_default().trim();
    let split = ["==", ">=", "~=", "<=", ">", "<"]
        .iter()
        .find_map(|op| spec.split_once(op).map(|(n, v)| (n, Some(v.trim()), *op)));
    let (name, version) = match split {
        Some((name, version, op)) => (name, version.filter(|_| op == "==" || op == ">=" || op == "~=")),
        None => (spec, None),
    };
    let name = name.split('[').next().unwrap_or(name).trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    valid.then(|| (normalize(name), version.map(ToString::to_string)))
}

fn latest(name: &str) -> String {
    KNOWN_VERSIONS
        .iter()
        .find(|(known, _)| *known == name)
        .map_or("1.0.0", |(_, v)| *v)
        .to_string()
}

fn install(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let mut specs: Vec<String> = inv.args.clone();
    for file in inv.values("r") {
        match state.vfs.read(file) {
            Ok(content) => specs.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(ToString::to_string),
            ),
            Err(_) => {
                return fail(
                    1,
                    format!(
                        "ERROR: Could not open requirements file: [Errno 2] No such file or directory: '{file}'"
                    ),
                );
            }
        }
    }
    if specs.is_empty() {
        return fail(
            1,
            "ERROR: You must give at least one requirement to install (see \"pip help install\")",
        );
    }

    let mut wanted = Vec::new();
    for spec in &specs {
        let Some((name, pinned)) = requirement(spec) else {
            return fail(1, format!("ERROR: Invalid requirement: '{spec}'"));
        };
        let version = pinned.unwrap_or_else(|| latest(&name));
        wanted.push((name, version));
    }

    let mut out = String::new();
    let mut installed = Vec::new();
    let mut result = CommandResult::default();
    for (name, version) in wanted {
        if state.pip.packages.get(&name) == Some(&version) && !inv.has("U") {
            let _ = writeln!(
                out,
                "Requirement already satisfied: {name} in {SITE_PACKAGES} ({version})"
            );
            continue;
        }
        let _ = writeln!(out, "Collecting {name}=={version}");
        let _ = writeln!(out, "  Downloading {}-{version}-py3-none-any.whl", name.replace('-', "_"));
        installed.push(format!("{name}-{version}"));
        state.pip.packages.insert(name.clone(), version.clone());
        result.mutations.push(Mutation::PackageInstalled { name, version });
    }
    if !installed.is_empty() {
        let _ = writeln!(out, "Installing collected packages: {}", installed.join(", "));
        let _ = write!(out, "Successfully installed {}", installed.join(" "));
    }
    result.stdout = if inv.has("q") {
        String::new()
    } else {
        out.trim_end().to_string()
    };
    result.into()
}

fn uninstall(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return fail(
            1,
            "ERROR: You must give at least one requirement to uninstall (see \"pip help uninstall\")",
        );
    }
    let mut out = Vec::new();
    let mut result = CommandResult::default();
    for arg in &inv.args {
        let name = normalize(arg);
        match state.pip.packages.remove(&name) {
            Some(version) => {
                out.push(format!(
                    "Found existing installation: {name} {version}\nUninstalling {name}-{version}:\n  Successfully uninstalled {name}-{version}"
                ));
                result.mutations.push(Mutation::PackageRemoved { name });
            }
            None => out.push(format!(
                "WARNING: Skipping {name} as it is not installed."
            )),
        }
    }
    result.stdout = out.join("\n");
    result.into()
}

fn list(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let width = state
        .pip
        .packages
        .keys()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("Package".len());
    let version_width = state
        .pip
        .packages
        .values()
        .map(String::len)
        .max()
        .unwrap_or(0)
        .max("Version".len());
    let mut out = format!(
        "{:<width$} Version\n{} {}",
        "Package",
        "-".repeat(width),
        "-".repeat(version_width)
    );
    for (name, version) in &state.pip.packages {
        let _ = write!(out, "\n{name:<width$} {version}");
    }
    CommandResult::ok(out).into()
}

fn freeze(_inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let lines: Vec<String> = state
        .pip
        .packages
        .iter()
        .filter(|(name, _)| !matches!(name.as_str(), "pip" | "setuptools"))
        .map(|(name, version)| format!("{name}=={version}"))
        .collect();
    CommandResult::ok(lines.join("\n")).into()
}

fn show(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return fail(1, "ERROR: Please provide a package name or names.");
    }
    let mut sections = Vec::new();
    let mut missing = Vec::new();
    for arg in &inv.args {
        let name = normalize(arg);
        match state.pip.packages.get(&name) {
            Some(version) => sections.push(format!(
                "Name: {name}\nVersion: {version}\nLocation: {SITE_PACKAGES}\nRequires: \nRequired-by: "
            )),
            None => missing.push(arg.clone()),
        }
    }
    let mut result = CommandResult::ok(sections.join("\n---\n"));
    if !missing.is_empty() {
        result.stderr = format!("WARNING: Package(s) not found: {}", missing.join(", "));
        result.exit_code = 1;
    }
    result.into()
}
