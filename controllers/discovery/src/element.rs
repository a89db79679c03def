//! Work items carried by the work queue.
//!
//! An `Element` is compared by full value. The queue deduplicates on that
//! value, so two identical elements enqueued while one is pending collapse
//! into a single processing pass.

use crate::error::MalformedElement;
use crds::SelectorType;
use std::fmt;

/// Resource kind an element refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Pod,
    Node,
    LogConfig,
    ClusterLogConfig,
    Sink,
    Interceptor,
    Vm,
}

impl ElementKind {
    /// Every kind, in dispatch table order.
    pub const ALL: [ElementKind; 7] = [
        ElementKind::Pod,
        ElementKind::Node,
        ElementKind::LogConfig,
        ElementKind::ClusterLogConfig,
        ElementKind::Sink,
        ElementKind::Interceptor,
        ElementKind::Vm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Pod => "pod",
            ElementKind::Node => "node",
            ElementKind::LogConfig => "logConfig",
            ElementKind::ClusterLogConfig => "clusterLogConfig",
            ElementKind::Sink => "sink",
            ElementKind::Interceptor => "interceptor",
            ElementKind::Vm => "vm",
        }
    }

    /// Whether elements of this kind carry a pipeline configuration.
    pub fn is_config(self) -> bool {
        matches!(self, ElementKind::LogConfig | ElementKind::ClusterLogConfig)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the reconciler should do with the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Operation {
    /// Converge on the current state of the object behind the key
    #[default]
    Sync,

    /// Tear down every match of `selector_type` recorded for a configuration.
    /// Produced when a selector changes under an existing configuration.
    DeleteAll,
}

/// The unit of queued work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element {
    pub kind: ElementKind,
    /// `<namespace>/<name>` for namespaced objects, `<name>` otherwise
    pub key: String,
    pub selector_type: SelectorType,
    pub operation: Operation,
}

impl Element {
    /// Creates a `Sync` element.
    pub fn new(kind: ElementKind, key: impl Into<String>, selector_type: SelectorType) -> Self {
        Self {
            kind,
            key: key.into(),
            selector_type,
            operation: Operation::Sync,
        }
    }

    /// Creates a `DeleteAll` element for a configuration key.
    pub fn delete_all(kind: ElementKind, key: impl Into<String>, selector_type: SelectorType) -> Self {
        Self {
            kind,
            key: key.into(),
            selector_type,
            operation: Operation::DeleteAll,
        }
    }

    /// Checks the producer contract.
    ///
    /// Filters never build elements that fail this check; a failure means a
    /// producer defect and the element is dropped without retry.
    pub fn validate(&self) -> Result<(), MalformedElement> {
        if self.key.is_empty() {
            return Err(MalformedElement::EmptyKey);
        }
        if self.operation == Operation::DeleteAll {
            if !self.kind.is_config() {
                return Err(MalformedElement::DeleteAllKind(self.kind));
            }
            if !matches!(self.selector_type, SelectorType::Pod | SelectorType::Node) {
                return Err(MalformedElement::DeleteAllSelector(self.selector_type));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operation {
            Operation::Sync => write!(f, "{} {} ({})", self.kind, self.key, self.selector_type),
            Operation::DeleteAll => write!(f, "{} {} (delete all {})", self.kind, self.key, self.selector_type),
        }
    }
}
