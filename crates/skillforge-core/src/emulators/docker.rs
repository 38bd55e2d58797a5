//! Container runtime emulation.

use super::{fail, image_ref, short_hash};
use crate::router::{Handler, Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::{Container, ContainerStatus, SimulatorState};
use crate::types::{CommandResult, Mutation};
use std::fmt::Write as _;

const ADJECTIVES: &[&str] = &[
    "admiring", "brave", "clever", "dreamy", "eager", "focused", "gallant", "happy",
    "jolly", "keen", "lucid", "modest", "nifty", "quirky", "serene", "vibrant",
];
const NOUNS: &[&str] = &[
    "babbage", "curie", "darwin", "euler", "franklin", "goodall", "hopper", "lovelace",
    "meitner", "newton", "noether", "pascal", "ritchie", "shannon", "turing", "wozniak",
];

/// Images that run until stopped when started without a command.
const SERVICES: &[&str] = &[
    "nginx", "httpd", "redis", "postgres", "mysql", "mongo", "rabbitmq", "node",
];

pub fn register(table: &mut RuleTable) {
    table.add_grammar(ToolGrammar {
        verb: "docker",
        aliases: &[],
        subcommands: true,
        value_flags: &["name", "p", "e", "v", "w", "network"],
        flag_aliases: &[
            ("detach", "d"),
            ("publish", "p"),
            ("env", "e"),
            ("volume", "v"),
            ("workdir", "w"),
            ("all", "a"),
            ("quiet", "q"),
            ("force", "f"),
            ("file", "f"),
            ("tag", "t"),
            ("interactive", "i"),
            ("tty", "t"),
        ],
        stop_at_positional: true,
    });
    table.add(rule(None, &["version"], &[], version));
    table.add(rule(Some("build"), &[], &["t", "f", "q", "no-cache"], build));
    table.add(rule(Some("pull"), &[], &["q"], pull));
    table.add(rule(Some("images"), &[], &["a", "q"], images));
    table.add(rule(
        Some("run"),
        &[],
        &["d", "i", "t", "rm", "name", "p", "e", "v", "w", "network"],
        run,
    ));
    table.add(rule(Some("ps"), &[], &["a", "q"], ps));
    table.add(rule(Some("stop"), &[], &[], stop));
    table.add(rule(Some("start"), &[], &[], start));
    table.add(rule(Some("rm"), &[], &["f"], remove));
    table.add(rule(Some("rmi"), &[], &["f"], remove_image));
}

const fn rule(
    subcommand: Option<&'static str>,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    handler: Handler,
) -> Rule {
    Rule {
        verb: "docker",
        subcommand,
        required,
        optional,
        handler,
    }
}

/// Left-aligned columns separated by at least three spaces.
fn columns(rows: &[Vec<String>]) -> String {
    let count = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..count)
        .map(|i| {
            rows.iter()
                .filter_map(|r| r.get(i))
                .map(String::len)
                .max()
                .unwrap_or(0)
        })
        .collect();
    rows.iter()
        .map(|row| {
            let line: String = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!("{cell:<width$}   ", width = widths[i]))
                .collect();
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn split_ref(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "<none>"),
    }
}

fn image_size(id: &str) -> String {
    let seed = u64::from_str_radix(&id[..id.len().min(4)], 16).unwrap_or(0);
    format!("{}MB", 20 + seed % 400)
}

fn version(_inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    CommandResult::ok("Docker version 24.0.7, build afdd53b").into()
}

/// Add `reference` unless present; returns pull output and the mutation.
fn ensure_image(state: &mut SimulatorState, reference: &str) -> Option<(String, Mutation)> {
    if state.docker.images.contains_key(reference) {
        return None;
    }
    let id = short_hash(&format!("image\0{reference}"), 12);
    let digest = short_hash(&format!("digest\0{reference}"), 64);
    let (repo, tag) = split_ref(reference);
    let library = if repo.contains('/') {
        repo.to_string()
    } else {
        format!("library/{repo}")
    };
    state.docker.images.insert(reference.to_string(), id);
    let output = format!(
        "{tag}: Pulling from {library}\nDigest: sha256:{digest}\nStatus: Downloaded newer image for {reference}\ndocker.io/{library}:{tag}"
    );
    Some((
        output,
        Mutation::DockerImageAdded {
            image: reference.to_string(),
        },
    ))
}

fn pull(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(image) = inv.arg(0) else {
        return fail(1, "\"docker pull\" requires exactly 1 argument.");
    };
    let reference = image_ref(image);
    let default_tag = if reference == image {
        ""
    } else {
        "Using default tag: latest\n"
    };
    match ensure_image(state, &reference) {
        Some((output, mutation)) => {
            let stdout = if inv.has("q") {
                reference
            } else {
                format!("{default_tag}{output}")
            };
            CommandResult::ok(stdout).with(mutation).into()
        }
        None => {
            let (repo, tag) = split_ref(&reference);
            CommandResult::ok(format!(
                "{default_tag}{tag}: Pulling from {repo}\nStatus: Image is up to date for {reference}"
            ))
            .into()
        }
    }
}

fn build(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(context) = inv.args.last() else {
        return fail(1, "ERROR: \"docker buildx build\" requires exactly 1 argument.");
    };
    // `-t` and `-f` values arrive as positionals ahead of the context.
    let mut tag = None;
    let mut dockerfile = None;
    for arg in &inv.args[..inv.args.len() - 1] {
        if inv.has("f") && dockerfile.is_none() && state.vfs.is_file(arg) {
            dockerfile = Some(state.vfs.resolve(arg));
        } else if inv.has("t") && tag.is_none() {
            tag = Some(arg.clone());
        }
    }
    let context = state.vfs.resolve(context);
    if !state.vfs.is_dir(&context) {
        return fail(
            1,
            format!("ERROR: unable to prepare context: path \"{context}\" not found"),
        );
    }
    let dockerfile = dockerfile.unwrap_or_else(|| {
        if context == "/" {
            "/Dockerfile".to_string()
        } else {
            format!("{context}/Dockerfile")
        }
    });
    let Ok(content) = state.vfs.read(&dockerfile) else {
        return fail(
            1,
            "ERROR: failed to solve: failed to read dockerfile: open Dockerfile: no such file or directory",
        );
    };
    let Some(base) = content
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix("FROM ").or_else(|| l.strip_prefix("from ")))
    else {
        return fail(
            1,
            "ERROR: failed to solve: dockerfile parse error: no build stage in current context",
        );
    };
    let base = base.split_whitespace().next().unwrap_or(base).to_string();
    let steps = content
        .lines()
        .filter(|l| {
            let l = l.trim();
            !l.is_empty() && !l.starts_with('#')
        })
        .count();

    state.docker.sequence += 1;
    let id = short_hash(
        &format!("build\0{tag:?}\0{content}\0{}", state.docker.sequence),
        12,
    );
    let reference = tag.as_deref().map_or_else(|| id.clone(), image_ref);
    state.docker.images.insert(reference.clone(), id.clone());

    let mut out = format!(
        "[+] Building 1.2s ({steps}/{steps}) FINISHED\n => [internal] load build definition from Dockerfile\n => [1/{steps}] FROM docker.io/library/{}\n => exporting to image\n => => writing image sha256:{id}",
        image_ref(&base)
    );
    if tag.is_some() {
        let _ = write!(out, "\n => => naming to docker.io/library/{reference}");
    }
    let stdout = if inv.has("q") {
        format!("sha256:{id}")
    } else {
        out
    };
    CommandResult::ok(stdout)
        .with(Mutation::DockerImageAdded { image: reference })
        .into()
}

fn images(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.has("q") {
        let ids: Vec<&str> = state.docker.images.values().map(String::as_str).collect();
        return CommandResult::ok(ids.join("\n")).into();
    }
    let mut rows = vec![
        ["REPOSITORY", "TAG", "IMAGE ID", "CREATED", "SIZE"]
            .map(String::from)
            .to_vec(),
    ];
    for (reference, id) in &state.docker.images {
        let (repo, tag) = if reference == id {
            ("<none>", "<none>")
        } else {
            split_ref(reference)
        };
        rows.push(vec![
            repo.to_string(),
            tag.to_string(),
            id.clone(),
            "2 weeks ago".to_string(),
            image_size(id),
        ]);
    }
    CommandResult::ok(columns(&rows)).into()
}

fn generated_name(sequence: u64) -> String {
    let hash = short_hash(&format!("name\0{sequence}"), 4);
    let n = usize::from_str_radix(&hash, 16).unwrap_or(0);
    format!(
        "{}_{}",
        ADJECTIVES[n % ADJECTIVES.len()],
        NOUNS[(n / ADJECTIVES.len()) % NOUNS.len()]
    )
}

fn run(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(image) = inv.arg(0) else {
        return fail(125, "docker: 'docker run' requires at least 1 argument.");
    };
    let reference = image_ref(image);
    let command: Vec<&str> = inv.args[1..].iter().map(String::as_str).collect();
    let repo = split_ref(&reference).0.rsplit('/').next().unwrap_or_default();

    let output = match command.split_first() {
        None if repo == "hello-world" => Some("Hello from Docker!\nThis message shows that your installation appears to be working correctly.".to_string()),
        None => None,
        Some((&"echo", words)) => Some(words.join(" ")),
        Some((&"true", _)) => Some(String::new()),
        // Arbitrary programs inside the container are not modelled.
        Some(_) => return Outcome::Unrecognized,
    };
    let long_running = output.is_none() && SERVICES.contains(&repo);
    if output.is_none() && !long_running {
        return Outcome::Unrecognized;
    }

    let sequence = state.docker.sequence + 1;
    let name = match inv.value("name") {
        Some(name) => name.to_string(),
        None => generated_name(sequence),
    };
    if let Some((id, _)) = state.docker.containers.iter().find(|(_, c)| c.name == name) {
        return fail(
            125,
            format!(
                "docker: Error response from daemon: Conflict. The container name \"/{name}\" is already in use by container \"{id}\". You have to remove (or rename) that container to be able to reuse that name."
            ),
        );
    }

    state.docker.sequence = sequence;
    let mut result = CommandResult::default();
    let mut lines = Vec::new();
    if let Some((pulled, mutation)) = ensure_image(state, &reference) {
        result.stderr = format!("Unable to find image '{reference}' locally");
        lines.push(pulled);
        result.mutations.push(mutation);
    }
    let full_id = short_hash(
        &format!("container\0{name}\0{reference}\0{sequence}"),
        64,
    );
    let id = full_id[..12].to_string();
    let status = if long_running {
        ContainerStatus::Running
    } else {
        ContainerStatus::Stopped
    };
    result.mutations.push(Mutation::ContainerCreated {
        id: id.clone(),
        image: reference.clone(),
    });
    result
        .mutations
        .push(Mutation::ContainerStarted { id: id.clone() });
    if status == ContainerStatus::Stopped {
        result
            .mutations
            .push(Mutation::ContainerStopped { id: id.clone() });
    }

    if inv.has("d") {
        lines.push(full_id);
    } else if let Some(output) = output {
        lines.push(output);
    }
    if inv.has("rm") && status == ContainerStatus::Stopped {
        result.mutations.push(Mutation::ContainerRemoved { id });
    } else {
        state.docker.containers.insert(
            id,
            Container {
                image: reference,
                name,
                status,
                command: (!command.is_empty()).then(|| command.join(" ")),
            },
        );
    }
    lines.retain(|l| !l.is_empty());
    result.stdout = lines.join("\n");
    result.into()
}

/// Container id for an id, id prefix or name.
fn find_container(state: &SimulatorState, key: &str) -> Option<String> {
    if state.docker.containers.contains_key(key) {
        return Some(key.to_string());
    }
    if let Some((id, _)) = state.docker.containers.iter().find(|(_, c)| c.name == key) {
        return Some(id.clone());
    }
    let mut prefixed = state
        .docker
        .containers
        .keys()
        .filter(|id| id.starts_with(key));
    match (prefixed.next(), prefixed.next()) {
        (Some(id), None) => Some(id.clone()),
        _ => None,
    }
}

fn no_such_container(key: &str) -> Outcome {
    fail(1, format!("Error response from daemon: No such container: {key}"))
}

fn ps(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let visible = state
        .docker
        .containers
        .iter()
        .filter(|(_, c)| inv.has("a") || c.status == ContainerStatus::Running);
    if inv.has("q") {
        let ids: Vec<&str> = visible.map(|(id, _)| id.as_str()).collect();
        return CommandResult::ok(ids.join("\n")).into();
    }
    let mut rows = vec![
        ["CONTAINER ID", "IMAGE", "COMMAND", "STATUS", "NAMES"]
            .map(String::from)
            .to_vec(),
    ];
    for (id, container) in visible {
        let status = match container.status {
            ContainerStatus::Running => "Up 2 minutes".to_string(),
            ContainerStatus::Stopped => "Exited (0) 1 minute ago".to_string(),
        };
        let command = container.command.as_deref().unwrap_or("\"/entrypoint.sh\"");
        rows.push(vec![
            id.clone(),
            container.image.clone(),
            command.to_string(),
            status,
            container.name.clone(),
        ]);
    }
    CommandResult::ok(columns(&rows)).into()
}

fn set_status(inv: &Invocation, state: &mut SimulatorState, target: ContainerStatus) -> Outcome {
    if inv.args.is_empty() {
        let command = inv.command_name();
        return fail(1, format!("\"{command}\" requires at least 1 argument."));
    }
    let mut ids = Vec::new();
    for key in &inv.args {
        let Some(id) = find_container(state, key) else {
            return no_such_container(key);
        };
        ids.push(id);
    }
    let mut result = CommandResult::ok(inv.args.join("\n"));
    for id in ids {
        let Some(container) = state.docker.containers.get_mut(&id) else {
            continue;
        };
        if container.status != target {
            container.status = target;
            result.mutations.push(match target {
                ContainerStatus::Running => Mutation::ContainerStarted { id },
                ContainerStatus::Stopped => Mutation::ContainerStopped { id },
            });
        }
    }
    result.into()
}

fn stop(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    set_status(inv, state, ContainerStatus::Stopped)
}

fn start(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    set_status(inv, state, ContainerStatus::Running)
}

fn remove(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return fail(1, "\"docker rm\" requires at least 1 argument.");
    }
    let mut ids = Vec::new();
    for key in &inv.args {
        let Some(id) = find_container(state, key) else {
            return no_such_container(key);
        };
        let running = state
            .docker
            .containers
            .get(&id)
            .is_some_and(|c| c.status == ContainerStatus::Running);
        if running && !inv.has("f") {
            return fail(
                1,
                format!(
                    "Error response from daemon: You cannot remove a running container {id}. Stop the container before attempting removal or force remove"
                ),
            );
        }
        ids.push(id);
    }
    let mut result = CommandResult::ok(inv.args.join("\n"));
    for id in ids {
        state.docker.containers.remove(&id);
        result.mutations.push(Mutation::ContainerRemoved { id });
    }
    result.into()
}

fn remove_image(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    if inv.args.is_empty() {
        return fail(1, "\"docker rmi\" requires at least 1 argument.");
    }
    let mut removals = Vec::new();
    for key in &inv.args {
        let reference = image_ref(key);
        let found = if state.docker.images.contains_key(&reference) {
            Some(reference)
        } else if state.docker.images.contains_key(key.as_str()) {
            Some(key.clone())
        } else {
            state
                .docker
                .images
                .iter()
                .find(|(_, id)| id.starts_with(key.as_str()))
                .map(|(r, _)| r.clone())
        };
        let Some(reference) = found else {
            return fail(1, format!("Error response from daemon: No such image: {key}"));
        };
        let id = state.docker.images.get(&reference).cloned().unwrap_or_default();
        let user = state
            .docker
            .containers
            .iter()
            .find(|(_, c)| c.image == reference);
        if let (Some((container, _)), false) = (user, inv.has("f")) {
            return fail(
                1,
                format!(
                    "Error response from daemon: conflict: unable to remove repository reference \"{key}\" (must force) - container {container} is using its referenced image {id}"
                ),
            );
        }
        removals.push((reference, id));
    }
    let mut result = CommandResult::default();
    let mut lines = Vec::new();
    for (reference, id) in removals {
        state.docker.images.remove(&reference);
        if reference != id {
            lines.push(format!("Untagged: {reference}"));
        }
        lines.push(format!("Deleted: sha256:{id}"));
        result
            .mutations
            .push(Mutation::DockerImageRemoved { image: reference });
    }
    result.stdout = lines.join("\n");
    result.into()
}
