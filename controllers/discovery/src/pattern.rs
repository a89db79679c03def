//! Extra-field templates.
//!
//! A template is literal text with `${variable}` placeholders, for example
//! `${_k8s.pod.namespace}-${_k8s.pod.name}`. Templates are compiled once at
//! startup and rendered for every matched target.
//!
//! Pod variables: `_k8s.pod.name`, `_k8s.pod.namespace`, `_k8s.pod.ip`,
//! `_k8s.pod.uid`, `_k8s.node.name`, `_k8s.pod.label.<key>` and
//! `_k8s.pod.annotation.<key>`. Node variables: `_k8s.node.name` and
//! `_k8s.node.label.<key>`. Vm variables: `vm.name` and `vm.label.<key>`.
//! Unknown variables render as empty text.

use crate::config::Config;
use crds::Vm;
use k8s_openapi::api::core::v1::{Node, Pod};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("unclosed placeholder at offset {0}")]
    Unclosed(usize),

    #[error("empty placeholder at offset {0}")]
    Empty(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Variable(String),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPattern {
    segments: Vec<Segment>,
}

impl FieldPattern {
    pub fn parse(text: &str) -> Result<Self, PatternError> {
        let mut segments = Vec::new();
        let mut literal_start = 0;

        for captures in PLACEHOLDER.captures_iter(text) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_literal(&mut segments, text, literal_start, whole.start())?;
            let variable = name.as_str().trim();
            if variable.is_empty() {
                return Err(PatternError::Empty(whole.start()));
            }
            segments.push(Segment::Variable(variable.to_string()));
            literal_start = whole.end();
        }
        push_literal(&mut segments, text, literal_start, text.len())?;

        Ok(Self { segments })
    }

    /// Renders the template, resolving each placeholder through `resolve`.
    pub fn render<F>(&self, resolve: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Variable(name) => resolve(name).unwrap_or_default(),
            })
            .collect()
    }
}

/// A `${...}` placeholder; the capture is the variable name.
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]*)\}").expect("placeholder regex is valid"));

/// Appends `text[from..to]` as literal text. An opening `${` left in it has
/// no closing brace.
fn push_literal(segments: &mut Vec<Segment>, text: &str, from: usize, to: usize) -> Result<(), PatternError> {
    let literal = &text[from..to];
    if let Some(open) = literal.find("${") {
        return Err(PatternError::Unclosed(from + open));
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal.to_string()));
    }
    Ok(())
}

type Patterns = BTreeMap<String, FieldPattern>;

fn compile_map<'a>(scope: &str, fields: impl IntoIterator<Item = (&'a String, &'a String)>, into: &mut Patterns) {
    for (field, text) in fields {
        match FieldPattern::parse(text) {
            Ok(pattern) => {
                into.insert(field.clone(), pattern);
            }
            Err(e) => warn!("Ignoring {} field {} pattern {:?}: {}", scope, field, text, e),
        }
    }
}

/// Extra-field templates for the current mode. Immutable after startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPatterns {
    pod: Patterns,
    node: Patterns,
    vm: Patterns,
}

impl FieldPatterns {
    /// Compiles the templates relevant to the configured mode.
    ///
    /// Legacy `k8sFields` entries override `typePodFields` entries of the
    /// same name. Invalid templates are logged and skipped.
    pub fn compile(config: &Config) -> Self {
        let mut patterns = Self::default();
        if config.vm_mode {
            compile_map("vm", &config.type_vm_fields, &mut patterns.vm);
        } else {
            compile_map("pod", &config.type_pod_fields, &mut patterns.pod);
            compile_map("pod", &config.k8s_fields, &mut patterns.pod);
            compile_map("node", &config.type_node_fields, &mut patterns.node);
        }
        patterns
    }

    pub fn render_pod(&self, pod: &Pod) -> BTreeMap<String, String> {
        render_all(&self.pod, |name| pod_variable(pod, name))
    }

    pub fn render_node(&self, node: &Node) -> BTreeMap<String, String> {
        render_all(&self.node, |name| node_variable(node, name))
    }

    pub fn render_vm(&self, vm: &Vm) -> BTreeMap<String, String> {
        render_all(&self.vm, |name| vm_variable(vm, name))
    }
}

fn render_all<F>(patterns: &Patterns, resolve: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    patterns
        .iter()
        .map(|(field, pattern)| (field.clone(), pattern.render(&resolve)))
        .collect()
}

fn map_lookup(map: Option<&BTreeMap<String, String>>, key: &str) -> Option<String> {
    map.and_then(|m| m.get(key)).cloned()
}

fn pod_variable(pod: &Pod, name: &str) -> Option<String> {
    if let Some(key) = name.strip_prefix("_k8s.pod.label.") {
        return map_lookup(pod.metadata.labels.as_ref(), key);
    }
    if let Some(key) = name.strip_prefix("_k8s.pod.annotation.") {
        return map_lookup(pod.metadata.annotations.as_ref(), key);
    }
    match name {
        "_k8s.pod.name" => pod.metadata.name.clone(),
        "_k8s.pod.namespace" => pod.metadata.namespace.clone(),
        "_k8s.pod.uid" => pod.metadata.uid.clone(),
        "_k8s.pod.ip" => pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        "_k8s.node.name" => pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        _ => None,
    }
}

fn node_variable(node: &Node, name: &str) -> Option<String> {
    if let Some(key) = name.strip_prefix("_k8s.node.label.") {
        return map_lookup(node.metadata.labels.as_ref(), key);
    }
    match name {
        "_k8s.node.name" => node.metadata.name.clone(),
        _ => None,
    }
}

fn vm_variable(vm: &Vm, name: &str) -> Option<String> {
    if let Some(key) = name.strip_prefix("vm.label.") {
        return map_lookup(vm.metadata.labels.as_ref(), key);
    }
    match name {
        "vm.name" => vm.metadata.name.clone(),
        _ => None,
    }
}
