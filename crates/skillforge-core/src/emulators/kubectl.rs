//! Cluster client emulation.
//!
//! Resources are tracked by namespace, kind and name only. Pods of a
//! deployment are derived on read and never stored.

use super::{fail, short_hash};
use crate::router::{Handler, Invocation, Outcome, Rule, RuleTable, ToolGrammar};
use crate::state::SimulatorState;
use crate::types::{CommandResult, Mutation};
use serde::Deserialize;

/// A known resource kind.
struct Kind {
    name: &'static str,
    plural: &'static str,
    short: &'static str,
    /// API group suffix used in messages (`.apps`).
    group: &'static str,
}

const KINDS: &[Kind] = &[
    Kind { name: "pod", plural: "pods", short: "po", group: "" },
    Kind { name: "deployment", plural: "deployments", short: "deploy", group: ".apps" },
    Kind { name: "service", plural: "services", short: "svc", group: "" },
    Kind { name: "namespace", plural: "namespaces", short: "ns", group: "" },
    Kind { name: "configmap", plural: "configmaps", short: "cm", group: "" },
    Kind { name: "secret", plural: "secrets", short: "secret", group: "" },
    Kind { name: "replicaset", plural: "replicasets", short: "rs", group: ".apps" },
    Kind { name: "statefulset", plural: "statefulsets", short: "sts", group: ".apps" },
    Kind { name: "daemonset", plural: "daemonsets", short: "ds", group: ".apps" },
    Kind { name: "ingress", plural: "ingresses", short: "ing", group: ".networking.k8s.io" },
    Kind { name: "job", plural: "jobs", short: "job", group: ".batch" },
    Kind { name: "cronjob", plural: "cronjobs", short: "cj", group: ".batch" },
    Kind { name: "serviceaccount", plural: "serviceaccounts", short: "sa", group: "" },
    Kind { name: "persistentvolumeclaim", plural: "persistentvolumeclaims", short: "pvc", group: "" },
];

const DEFAULT_NAMESPACE: &str = "default";

fn kind(word: &str) -> Option<&'static Kind> {
    let word = word.to_lowercase();
    KINDS
        .iter()
        .find(|k| k.name == word || k.plural == word || k.short == word)
}

impl Kind {
    /// `deployment.apps/web`
    fn reference(&self, name: &str) -> String {
        format!("{}{}/{name}", self.name, self.group)
    }

    /// `deployments.apps "web"`
    fn quoted(&self, name: &str) -> String {
        format!("{}{} \"{name}\"", self.plural, self.group)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: Option<String>,
    namespace: Option<String>,
}

/// A validated manifest document.
struct Resource {
    kind: &'static Kind,
    namespace: String,
    name: String,
}

pub fn register(table: &mut RuleTable) {
    table.add_grammar(ToolGrammar {
        verb: "kubectl",
        aliases: &[],
        subcommands: true,
        value_flags: &["f", "n", "image", "replicas"],
        flag_aliases: &[
            ("filename", "f"),
            ("namespace", "n"),
            ("all-namespaces", "A"),
        ],
        stop_at_positional: false,
    });
    table.add(rule(Some("version"), &[], &["client"], version));
    table.add(rule(Some("apply"), &["f"], &["n"], apply));
    table.add(rule(Some("create"), &["f"], &["n"], create_from_file));
    table.add(rule(Some("create"), &[], &["n", "image", "replicas"], create));
    table.add(rule(Some("delete"), &[], &["n"], delete));
    table.add(rule(Some("delete"), &["f"], &["n"], delete_from_file));
    table.add(rule(Some("get"), &[], &["n", "A"], get));
}

const fn rule(
    subcommand: Option<&'static str>,
    required: &'static [&'static str],
    optional: &'static [&'static str],
    handler: Handler,
) -> Rule {
    Rule {
        verb: "kubectl",
        subcommand,
        required,
        optional,
        handler,
    }
}

fn namespace_flag(inv: &Invocation) -> String {
    inv.value("n").unwrap_or(DEFAULT_NAMESPACE).to_string()
}

fn exists(state: &SimulatorState, resource: &Resource) -> bool {
    if resource.kind.name == "namespace" {
        return state.kube.namespaces.contains_key(&resource.name);
    }
    state
        .kube
        .namespaces
        .get(&resource.namespace)
        .and_then(|kinds| kinds.get(resource.kind.name))
        .is_some_and(|names| names.contains(&resource.name))
}

/// Store a resource; cluster-scoped namespaces are recorded with an empty
/// namespace in the mutation.
fn store(state: &mut SimulatorState, resource: &Resource) -> Mutation {
    if resource.kind.name == "namespace" {
        state
            .kube
            .namespaces
            .entry(resource.name.clone())
            .or_default();
        return Mutation::KubeResourceApplied {
            namespace: String::new(),
            resource: resource.kind.name.to_string(),
            name: resource.name.clone(),
        };
    }
    state
        .kube
        .namespaces
        .entry(resource.namespace.clone())
        .or_default()
        .entry(resource.kind.name.to_string())
        .or_default()
        .insert(resource.name.clone());
    Mutation::KubeResourceApplied {
        namespace: resource.namespace.clone(),
        resource: resource.kind.name.to_string(),
        name: resource.name.clone(),
    }
}

fn drop_resource(state: &mut SimulatorState, resource: &Resource) -> Mutation {
    if resource.kind.name == "namespace" {
        state.kube.namespaces.remove(&resource.name);
        return Mutation::KubeResourceDeleted {
            namespace: String::new(),
            resource: resource.kind.name.to_string(),
            name: resource.name.clone(),
        };
    }
    if let Some(names) = state
        .kube
        .namespaces
        .get_mut(&resource.namespace)
        .and_then(|kinds| kinds.get_mut(resource.kind.name))
    {
        names.remove(&resource.name);
    }
    Mutation::KubeResourceDeleted {
        namespace: resource.namespace.clone(),
        resource: resource.kind.name.to_string(),
        name: resource.name.clone(),
    }
}

/// Parse every document of a manifest file.
fn load_manifest(
    inv: &Invocation,
    state: &SimulatorState,
) -> Result<(String, Vec<Resource>), Outcome> {
    let file = inv.value("f").unwrap_or_default().to_string();
    let content = state
        .vfs
        .read(&file)
        .map_err(|_| fail(1, format!("error: the path \"{file}\" does not exist")))?;
    let fallback_namespace = namespace_flag(inv);
    let mut resources = Vec::new();
    for document in content.split("\n---") {
        let document = document.trim_start_matches("---");
        if document.trim().is_empty() {
            continue;
        }
        let manifest: Manifest = serde_yml::from_str(document)
            .map_err(|e| fail(1, format!("error: error parsing {file}: {e}")))?;
        let Some(kind_name) = manifest.kind else {
            return Err(fail(
                1,
                format!("error: error validating \"{file}\": error validating data: kind not set"),
            ));
        };
        let metadata = manifest.metadata.unwrap_or(Metadata {
            name: None,
            namespace: None,
        });
        let Some(name) = metadata.name else {
            return Err(fail(
                1,
                format!("error: error when retrieving current configuration of \"{file}\": resource name may not be empty"),
            ));
        };
        let Some(kind) = kind(&kind_name) else {
            return Err(fail(
                1,
                format!(
                    "error: resource mapping not found for name: \"{name}\" namespace: \"\" from \"{file}\": no matches for kind \"{kind_name}\" in version \"v1\""
                ),
            ));
        };
        resources.push(Resource {
            kind,
            namespace: metadata
                .namespace
                .unwrap_or_else(|| fallback_namespace.clone()),
            name,
        });
    }
    Ok((file, resources))
}

/// Namespaces a batch needs that neither exist nor are created by it.
fn missing_namespace(state: &SimulatorState, resources: &[Resource]) -> Option<String> {
    resources
        .iter()
        .filter(|r| r.kind.name != "namespace")
        .map(|r| &r.namespace)
        .find(|ns| {
            !state.kube.namespaces.contains_key(*ns)
                && !resources
                    .iter()
                    .any(|r| r.kind.name == "namespace" && &r.name == *ns)
        })
        .cloned()
}

fn version(inv: &Invocation, _state: &mut SimulatorState) -> Outcome {
    let mut out = "Client Version: v1.29.0\nKustomize Version: v5.0.4-0.20230601165947-6ce0bf390ce3".to_string();
    if !inv.has("client") {
        out.push_str("\nServer Version: v1.29.0");
    }
    CommandResult::ok(out).into()
}

fn apply(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    apply_manifest(inv, state, false)
}

fn create_from_file(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    apply_manifest(inv, state, true)
}

fn apply_manifest(inv: &Invocation, state: &mut SimulatorState, strict: bool) -> Outcome {
    let (file, resources) = match load_manifest(inv, state) {
        Ok(loaded) => loaded,
        Err(outcome) => return outcome,
    };
    if resources.is_empty() {
        return fail(1, format!("error: no objects passed to apply from \"{file}\""));
    }
    if let Some(ns) = missing_namespace(state, &resources) {
        return fail(
            1,
            format!("Error from server (NotFound): error when creating \"{file}\": namespaces \"{ns}\" not found"),
        );
    }
    if strict {
        if let Some(existing) = resources.iter().find(|r| exists(state, r)) {
            return fail(
                1,
                format!(
                    "Error from server (AlreadyExists): error when creating \"{file}\": {} already exists",
                    existing.kind.quoted(&existing.name)
                ),
            );
        }
    }
    let mut result = CommandResult::default();
    let mut lines = Vec::new();
    for resource in &resources {
        let verb = if exists(state, resource) {
            "configured"
        } else {
            "created"
        };
        lines.push(format!("{} {verb}", resource.kind.reference(&resource.name)));
        result.mutations.push(store(state, resource));
    }
    result.stdout = lines.join("\n");
    result.into()
}

fn create(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let (Some(kind_word), Some(name)) = (inv.arg(0), inv.arg(1)) else {
        return Outcome::Unrecognized;
    };
    let Some(kind) = kind(kind_word) else {
        return Outcome::Unrecognized;
    };
    let resource = Resource {
        kind,
        namespace: namespace_flag(inv),
        name: name.to_string(),
    };
    match kind.name {
        "namespace" => {
            if exists(state, &resource) {
                return fail(
                    1,
                    format!("Error from server (AlreadyExists): namespaces \"{name}\" already exists"),
                );
            }
        }
        "deployment" => {
            if !inv.has("image") {
                return fail(1, "error: required flag(s) \"image\" not set");
            }
            if !state.kube.namespaces.contains_key(&resource.namespace) {
                return fail(
                    1,
                    format!("error: failed to create deployment: namespaces \"{}\" not found", resource.namespace),
                );
            }
            if exists(state, &resource) {
                return fail(
                    1,
                    format!("error: failed to create deployment: {} already exists", kind.quoted(name)),
                );
            }
        }
        _ => return Outcome::Unrecognized,
    }
    let mutation = store(state, &resource);
    CommandResult::ok(format!("{} created", kind.reference(name)))
        .with(mutation)
        .into()
}

/// Pod name derived from a deployment.
fn derived_pod(namespace: &str, deployment: &str) -> String {
    let seed = format!("{namespace}/{deployment}");
    format!(
        "{deployment}-{}-{}",
        short_hash(&format!("rs\0{seed}"), 10),
        short_hash(&format!("pod\0{seed}"), 5)
    )
}

fn pods(state: &SimulatorState, namespace: &str) -> Vec<String> {
    let Some(kinds) = state.kube.namespaces.get(namespace) else {
        return Vec::new();
    };
    let mut names: Vec<String> = kinds
        .get("deployment")
        .into_iter()
        .flatten()
        .map(|d| derived_pod(namespace, d))
        .chain(kinds.get("pod").into_iter().flatten().cloned())
        .collect();
    names.sort();
    names
}

fn delete(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(kind_word) = inv.arg(0) else {
        return fail(
            1,
            "error: You must provide one or more resources by argument or filename.",
        );
    };
    let Some(kind) = kind(kind_word) else {
        return fail(
            1,
            format!("error: the server doesn't have a resource type \"{kind_word}\""),
        );
    };
    if inv.args.len() < 2 {
        return fail(1, "error: resource(s) were provided, but no name was specified");
    }
    let namespace = namespace_flag(inv);
    let names = &inv.args[1..];
    let mut doomed: Vec<Resource> = Vec::new();
    for (index, name) in names.iter().enumerate() {
        let resource = Resource {
            kind,
            namespace: namespace.clone(),
            name: name.clone(),
        };
        let repeated = names[..index].contains(name);
        if exists(state, &resource) && !repeated {
            doomed.push(resource);
        } else if repeated
            || !(kind.name == "pod" && pods(state, &namespace).contains(name))
        {
            // A derived pod is recreated by its deployment, so deleting one
            // leaves the state as it was.
            return fail(
                1,
                format!("Error from server (NotFound): {} not found", kind.quoted(name)),
            );
        }
    }
    let lines: Vec<String> = names
        .iter()
        .map(|name| format!("{} deleted", kind.quoted(name)))
        .collect();
    let mut result = CommandResult::ok(lines.join("\n"));
    for resource in &doomed {
        result.mutations.push(drop_resource(state, resource));
    }
    result.into()
}

fn delete_from_file(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let (file, resources) = match load_manifest(inv, state) {
        Ok(loaded) => loaded,
        Err(outcome) => return outcome,
    };
    if let Some(missing) = resources.iter().find(|r| !exists(state, r)) {
        return fail(
            1,
            format!(
                "Error from server (NotFound): error when deleting \"{file}\": {} not found",
                missing.kind.quoted(&missing.name)
            ),
        );
    }
    let mut result = CommandResult::default();
    let mut lines = Vec::new();
    for resource in &resources {
        lines.push(format!("{} deleted", resource.kind.quoted(&resource.name)));
        result.mutations.push(drop_resource(state, resource));
    }
    result.stdout = lines.join("\n");
    result.into()
}

fn table(rows: &[Vec<String>]) -> String {
    let count = rows.first().map_or(0, Vec::len);
    let widths: Vec<usize> = (0..count)
        .map(|i| rows.iter().filter_map(|r| r.get(i)).map(String::len).max().unwrap_or(0))
        .collect();
    rows.iter()
        .map(|row| {
            let line: String = row
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{cell:<width$}   "))
                .collect();
            line.trim_end().to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Columns of one listed resource.
fn row(kind: &Kind, name: &str) -> Vec<String> {
    let name = name.to_string();
    match kind.name {
        "pod" => vec![name, "1/1".into(), "Running".into(), "0".into(), "2m".into()],
        "deployment" => vec![name, "1/1".into(), "1".into(), "1".into(), "2m".into()],
        "namespace" => vec![name, "Active".into(), "2m".into()],
        _ => vec![name, "2m".into()],
    }
}

fn header(kind: &Kind) -> Vec<String> {
    let columns: &[&str] = match kind.name {
        "pod" => &["NAME", "READY", "STATUS", "RESTARTS", "AGE"],
        "deployment" => &["NAME", "READY", "UP-TO-DATE", "AVAILABLE", "AGE"],
        "namespace" => &["NAME", "STATUS", "AGE"],
        _ => &["NAME", "AGE"],
    };
    columns.iter().map(|c| (*c).to_string()).collect()
}

fn names_in(state: &SimulatorState, kind: &Kind, namespace: &str) -> Vec<String> {
    if kind.name == "pod" {
        return pods(state, namespace);
    }
    state
        .kube
        .namespaces
        .get(namespace)
        .and_then(|kinds| kinds.get(kind.name))
        .map(|names| names.iter().cloned().collect())
        .unwrap_or_default()
}

fn get(inv: &Invocation, state: &mut SimulatorState) -> Outcome {
    let Some(kind_word) = inv.arg(0) else {
        return fail(
            1,
            "error: You must specify the type of resource to get.",
        );
    };
    let Some(kind) = kind(kind_word) else {
        return if kind_word == "all" {
            Outcome::Unrecognized
        } else {
            fail(
                1,
                format!("error: the server doesn't have a resource type \"{kind_word}\""),
            )
        };
    };

    if kind.name == "namespace" {
        let mut rows = vec![header(kind)];
        for ns in state.kube.namespaces.keys() {
            if inv.arg(1).is_none_or(|wanted| wanted == ns) {
                rows.push(row(kind, ns));
            }
        }
        if let (Some(wanted), 1) = (inv.arg(1), rows.len()) {
            return fail(
                1,
                format!("Error from server (NotFound): {} not found", kind.quoted(wanted)),
            );
        }
        return CommandResult::ok(table(&rows)).into();
    }

    let all = inv.has("A");
    let namespaces: Vec<String> = if all {
        state.kube.namespaces.keys().cloned().collect()
    } else {
        vec![namespace_flag(inv)]
    };
    let mut rows = Vec::new();
    for ns in &namespaces {
        for name in names_in(state, kind, ns) {
            if inv.arg(1).is_some_and(|wanted| wanted != name) {
                continue;
            }
            let mut cells = row(kind, &name);
            if all {
                cells.insert(0, ns.clone());
            }
            rows.push(cells);
        }
    }
    if rows.is_empty() {
        if let Some(wanted) = inv.arg(1) {
            return fail(
                1,
                format!("Error from server (NotFound): {} not found", kind.quoted(wanted)),
            );
        }
        let message = if all {
            "No resources found".to_string()
        } else {
            format!("No resources found in {} namespace.", namespaces.join(""))
        };
        return CommandResult::error(0, message).into();
    }
    let mut head = header(kind);
    if all {
        head.insert(0, "NAMESPACE".to_string());
    }
    rows.insert(0, head);
    CommandResult::ok(table(&rows)).into()
}
