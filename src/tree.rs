//! Branching message tree derived from a flat list of parent-linked messages.
//!
//! The tree is always rebuilt from scratch whenever the server copy of a
//! conversation changes; nothing here mutates a node in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub children: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageNode {
    pub message: Message,
    pub sibling_index: usize,
    pub sibling_count: usize,
    /// Ids of nodes whose effective parent is this node, in input order.
    pub children: Vec<String>,
}

impl MessageNode {
    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn has_siblings(&self) -> bool {
        self.sibling_count > 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageTree {
    nodes: HashMap<String, MessageNode>,
    /// Input order, used for deterministic tie-breaking.
    order: Vec<String>,
    /// Effective parent of each node (`None` for roots and orphans).
    parents: HashMap<String, Option<String>>,
    roots: Vec<String>,
}

impl MessageTree {
    pub fn get(&self, id: &str) -> Option<&MessageNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    /// Nodes in the order they were supplied.
    pub fn iter(&self) -> impl Iterator<Item = &MessageNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Ordered ids sharing `id`'s effective parent, including `id` itself.
    pub fn siblings(&self, id: &str) -> Vec<String> {
        match self.parents.get(id) {
            Some(Some(parent)) => self
                .nodes
                .get(parent)
                .map(|p| p.children.clone())
                .unwrap_or_default(),
            Some(None) => self.roots.clone(),
            None => Vec::new(),
        }
    }

    fn parent_of(&self, id: &str) -> Option<&str> {
        self.parents.get(id).and_then(|p| p.as_deref())
    }
}

/// Build the node map. Missing or self-referencing parents make a message
/// root-like; duplicated ids keep their first occurrence.
pub fn build_tree(messages: &[Message]) -> MessageTree {
    let mut order: Vec<String> = Vec::with_capacity(messages.len());
    let mut by_id: HashMap<&str, &Message> = HashMap::with_capacity(messages.len());
    for msg in messages {
        if by_id.contains_key(msg.id.as_str()) {
            warn!("Duplicate message id {} in conversation, keeping first", msg.id);
            continue;
        }
        by_id.insert(msg.id.as_str(), msg);
        order.push(msg.id.clone());
    }

    let mut parents: HashMap<String, Option<String>> = HashMap::with_capacity(order.len());
    let mut groups: HashMap<Option<String>, Vec<String>> = HashMap::new();
    for id in &order {
        let msg = by_id[id.as_str()];
        let effective = msg
            .parent_id
            .as_ref()
            .filter(|p| *p != id && by_id.contains_key(p.as_str()))
            .cloned();
        groups.entry(effective.clone()).or_default().push(id.clone());
        parents.insert(id.clone(), effective);
    }

    let mut nodes = HashMap::with_capacity(order.len());
    for id in &order {
        let parent = &parents[id];
        let siblings = &groups[parent];
        let sibling_index = siblings.iter().position(|s| s == id).unwrap_or(0);
        let children = groups.get(&Some(id.clone())).cloned().unwrap_or_default();
        nodes.insert(
            id.clone(),
            MessageNode {
                message: by_id[id.as_str()].clone(),
                sibling_index,
                sibling_count: siblings.len(),
                children,
            },
        );
    }

    let roots = groups.remove(&None).unwrap_or_default();
    MessageTree {
        nodes,
        order,
        parents,
        roots,
    }
}

/// Root-to-leaf chain ending at `active_leaf_id`, or at the newest leaf when
/// no id is given. An unknown id yields an empty path.
pub fn extract_active_path(tree: &MessageTree, active_leaf_id: Option<&str>) -> Vec<MessageNode> {
    let leaf = match active_leaf_id {
        Some(id) => {
            if tree.get(id).is_none() {
                return Vec::new();
            }
            id.to_string()
        }
        None => match newest_leaf(tree, tree.order.iter()) {
            Some(id) => id,
            None => return Vec::new(),
        },
    };

    let mut path = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut cursor = Some(leaf.as_str());
    while let Some(id) = cursor {
        if !visited.insert(id) {
            break;
        }
        let Some(node) = tree.get(id) else { break };
        path.push(node.clone());
        cursor = tree.parent_of(id);
    }
    path.reverse();
    path
}

/// Newest leaf in the subtree rooted at `id` (the node itself when it has no
/// children). Used when switching to a sibling branch.
pub fn latest_leaf_under(tree: &MessageTree, id: &str) -> Option<String> {
    tree.get(id)?;
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack = vec![id.to_string()];
    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(node) = tree.get(&current) {
            stack.extend(node.children.iter().cloned());
        }
    }
    let in_subtree: Vec<&String> = tree.order.iter().filter(|i| visited.contains(*i)).collect();
    newest_leaf(tree, in_subtree.into_iter())
}

fn newest_leaf<'a>(tree: &MessageTree, ids: impl Iterator<Item = &'a String> + Clone) -> Option<String> {
    let newest = |only_leaves: bool| {
        let mut best: Option<&MessageNode> = None;
        for id in ids.clone() {
            let Some(node) = tree.get(id) else { continue };
            if only_leaves && !node.children.is_empty() {
                continue;
            }
            // `>=` lets later input win ties.
            if best.map_or(true, |b| node.message.created_at >= b.message.created_at) {
                best = Some(node);
            }
        }
        best.map(|n| n.message.id.clone())
    };
    newest(true).or_else(|| newest(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(id: &str, parent: Option<&str>, ts: i64) -> Message {
        Message {
            id: id.to_string(),
            parent_id: parent.map(String::from),
            content: format!("content {id}"),
            response: None,
            created_at: Utc.timestamp_opt(ts, 0).unwrap(),
            children: Vec::new(),
        }
    }

    fn ids(path: &[MessageNode]) -> Vec<&str> {
        path.iter().map(|n| n.id()).collect()
    }

    #[test]
    fn test_linear_path_to_requested_leaf() {
        let messages = vec![
            msg("a", None, 1),
            msg("b", Some("a"), 2),
            msg("c", Some("b"), 3),
        ];
        let tree = build_tree(&messages);
        let path = extract_active_path(&tree, Some("c"));
        assert_eq!(ids(&path), vec!["a", "b", "c"]);
        assert_eq!(path.len(), 3);
    }

    #[test]
    fn test_sibling_metadata_follows_input_order() {
        let messages = vec![
            msg("root", None, 1),
            msg("edit1", Some("root"), 2),
            msg("edit2", Some("root"), 3),
            msg("edit3", Some("root"), 4),
        ];
        let tree = build_tree(&messages);
        let e2 = tree.get("edit2").unwrap();
        assert_eq!(e2.sibling_index, 1);
        assert_eq!(e2.sibling_count, 3);
        assert!(e2.has_siblings());
        assert_eq!(tree.get("root").unwrap().children, vec!["edit1", "edit2", "edit3"]);
        assert_eq!(tree.siblings("edit3"), vec!["edit1", "edit2", "edit3"]);
    }

    #[test]
    fn test_build_is_deterministic() {
        let messages = vec![
            msg("r", None, 1),
            msg("x", Some("r"), 2),
            msg("y", Some("r"), 2),
            msg("z", Some("x"), 5),
        ];
        let first = build_tree(&messages);
        let second = build_tree(&messages);
        for node in first.iter() {
            let other = second.get(node.id()).unwrap();
            assert_eq!(node.sibling_index, other.sibling_index);
            assert_eq!(node.sibling_count, other.sibling_count);
        }
    }

    #[test]
    fn test_default_path_picks_newest_leaf() {
        let messages = vec![
            msg("r", None, 1),
            msg("old", Some("r"), 2),
            msg("new", Some("r"), 9),
            msg("old-child", Some("old"), 5),
        ];
        let tree = build_tree(&messages);
        let path = extract_active_path(&tree, None);
        assert_eq!(ids(&path), vec!["r", "new"]);
        assert_eq!(path, extract_active_path(&tree, None));
    }

    #[test]
    fn test_missing_leaf_returns_empty() {
        let tree = build_tree(&[msg("a", None, 1)]);
        assert!(extract_active_path(&tree, Some("nope")).is_empty());
        assert!(extract_active_path(&build_tree(&[]), None).is_empty());
    }

    #[test]
    fn test_orphans_are_root_like() {
        let messages = vec![msg("a", None, 1), msg("b", Some("ghost"), 2)];
        let tree = build_tree(&messages);
        assert_eq!(tree.roots(), &["a".to_string(), "b".to_string()]);
        assert_eq!(tree.get("b").unwrap().sibling_count, 2);
        assert_eq!(ids(&extract_active_path(&tree, Some("b"))), vec!["b"]);
    }

    #[test]
    fn test_cycle_terminates() {
        let messages = vec![msg("a", Some("b"), 1), msg("b", Some("a"), 2)];
        let tree = build_tree(&messages);
        assert_eq!(tree.len(), 2);
        let path = extract_active_path(&tree, Some("a"));
        assert_eq!(path.len(), 2);
        assert_eq!(path.last().unwrap().id(), "a");
        // No leaves at all: falls back to the newest node.
        assert_eq!(extract_active_path(&tree, None).last().unwrap().id(), "b");
    }

    #[test]
    fn test_self_parent_and_duplicates() {
        let messages = vec![msg("a", Some("a"), 1), msg("a", None, 5), msg("b", Some("a"), 2)];
        let tree = build_tree(&messages);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.roots(), &["a".to_string()]);
        assert_eq!(tree.get("a").unwrap().message.created_at.timestamp(), 1);
    }

    #[test]
    fn test_latest_leaf_under_subtree() {
        let messages = vec![
            msg("r", None, 1),
            msg("a", Some("r"), 2),
            msg("b", Some("r"), 3),
            msg("a1", Some("a"), 4),
            msg("a2", Some("a"), 7),
            msg("b1", Some("b"), 9),
        ];
        let tree = build_tree(&messages);
        assert_eq!(latest_leaf_under(&tree, "a").as_deref(), Some("a2"));
        assert_eq!(latest_leaf_under(&tree, "b1").as_deref(), Some("b1"));
        assert_eq!(latest_leaf_under(&tree, "r").as_deref(), Some("b1"));
        assert!(latest_leaf_under(&tree, "missing").is_none());
    }
}
