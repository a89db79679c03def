//! Selector match indices.
//!
//! Each index maps a configuration key to the set of target keys its
//! selector currently matches (pods, nodes or the cluster itself). The
//! worker is the only writer; probes and logs only read.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Which targets an index tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Pod,
    Cluster,
    Node,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Pod => "pod",
            IndexKind::Cluster => "cluster",
            IndexKind::Node => "node",
        }
    }
}

/// Config key to matched target keys.
#[derive(Debug, Clone)]
pub struct MatchIndex {
    kind: IndexKind,
    matches: Arc<RwLock<HashMap<String, BTreeSet<String>>>>,
}

impl MatchIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            matches: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Replaces the matches of `config` and returns `(attached, detached)` targets.
    pub fn set_matches(&self, config: &str, targets: BTreeSet<String>) -> (Vec<String>, Vec<String>) {
        let mut matches = self.matches.write().unwrap_or_else(PoisonError::into_inner);
        let previous = matches.remove(config).unwrap_or_default();

        let attached = targets.difference(&previous).cloned().collect();
        let detached = previous.difference(&targets).cloned().collect();
        if !targets.is_empty() {
            matches.insert(config.to_string(), targets);
        }
        (attached, detached)
    }

    /// Records a single match. Returns false if it was already present.
    pub fn add_target(&self, config: &str, target: &str) -> bool {
        self.matches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(config.to_string())
            .or_default()
            .insert(target.to_string())
    }

    /// Removes a single match. Returns false if it was not present.
    pub fn remove_target(&self, config: &str, target: &str) -> bool {
        let mut matches = self.matches.write().unwrap_or_else(PoisonError::into_inner);
        let Some(targets) = matches.get_mut(config) else {
            return false;
        };
        let removed = targets.remove(target);
        if targets.is_empty() {
            matches.remove(config);
        }
        removed
    }

    /// Forgets `config`; returns the targets it matched.
    pub fn remove_config(&self, config: &str) -> BTreeSet<String> {
        self.matches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(config)
            .unwrap_or_default()
    }

    /// Targets currently matched by `config`.
    pub fn matches(&self, config: &str) -> BTreeSet<String> {
        self.matches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(config)
            .cloned()
            .unwrap_or_default()
    }

    /// Configurations currently matching `target`, sorted.
    pub fn configs_for(&self, target: &str) -> Vec<String> {
        let matches = self.matches.read().unwrap_or_else(PoisonError::into_inner);
        let mut configs: Vec<String> = matches
            .iter()
            .filter(|(_, targets)| targets.contains(target))
            .map(|(config, _)| config.clone())
            .collect();
        configs.sort();
        configs
    }

    /// Number of configurations with at least one match.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.matches.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_set_matches_reports_diff() {
        let index = MatchIndex::new(IndexKind::Pod);

        let (attached, detached) = index.set_matches("default/a", set(&["default/p1", "default/p2"]));
        assert_eq!(attached, vec!["default/p1", "default/p2"]);
        assert!(detached.is_empty());

        let (attached, detached) = index.set_matches("default/a", set(&["default/p2", "default/p3"]));
        assert_eq!(attached, vec!["default/p3"]);
        assert_eq!(detached, vec!["default/p1"]);

        let (attached, detached) = index.set_matches("default/a", BTreeSet::new());
        assert!(attached.is_empty());
        assert_eq!(detached, vec!["default/p2", "default/p3"]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_single_target_updates() {
        let index = MatchIndex::new(IndexKind::Node);
        assert!(index.add_target("global", "node-1"));
        assert!(!index.add_target("global", "node-1"));
        assert_eq!(index.configs_for("node-1"), vec!["global"]);

        assert!(index.remove_target("global", "node-1"));
        assert!(!index.remove_target("global", "node-1"));
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_config() {
        let index = MatchIndex::new(IndexKind::Cluster);
        index.add_target("global", "prod");
        assert_eq!(index.remove_config("global"), set(&["prod"]));
        assert!(index.remove_config("global").is_empty());
    }
}
