//! Client-facing file tree nodes.
//!
//! A listing is rendered one directory level at a time: directories come back
//! with an empty `children` array meaning "expandable, not loaded yet", and the
//! client fetches the next level with a longer path and splices it in.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireNode", from = "WireNode")]
pub enum TreeNode {
    Directory {
        id: String,
        name: String,
        children: Vec<TreeNode>,
    },
    File {
        id: String,
        name: String,
    },
}

impl TreeNode {
    /// Build a node from a listing entry. Directories carry a trailing `/`.
    pub fn from_entry(entry: &str) -> Self {
        let is_dir = entry.ends_with('/');
        let cleaned = entry.strip_suffix('/').unwrap_or(entry);
        let name = cleaned.rsplit('/').next().unwrap_or(cleaned).to_string();

        if is_dir {
            TreeNode::Directory {
                id: entry.to_string(),
                name,
                children: Vec::new(),
            }
        } else {
            TreeNode::File {
                id: entry.to_string(),
                name,
            }
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TreeNode::Directory { id, .. } | TreeNode::File { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TreeNode::Directory { name, .. } | TreeNode::File { name, .. } => name,
        }
    }

    pub fn is_selectable(&self) -> bool {
        matches!(self, TreeNode::File { .. })
    }

    pub fn children(&self) -> Option<&[TreeNode]> {
        match self {
            TreeNode::Directory { children, .. } => Some(children),
            TreeNode::File { .. } => None,
        }
    }
}

/// Render exactly one directory level.
pub fn build_tree<S: AsRef<str>>(entries: &[S]) -> Vec<TreeNode> {
    entries
        .iter()
        .map(|entry| TreeNode::from_entry(entry.as_ref()))
        .collect()
}

/// Replace the children of the directory whose id is `dir_id`, searching the
/// whole tree. Returns `false` if no such directory exists.
pub fn splice_children(nodes: &mut [TreeNode], dir_id: &str, level: Vec<TreeNode>) -> bool {
    let mut level = Some(level);
    splice_inner(nodes, dir_id, &mut level)
}

fn splice_inner(nodes: &mut [TreeNode], dir_id: &str, level: &mut Option<Vec<TreeNode>>) -> bool {
    for node in nodes.iter_mut() {
        if let TreeNode::Directory { id, children, .. } = node {
            if id == dir_id {
                if let Some(level) = level.take() {
                    *children = level;
                }
                return true;
            }
            if dir_id.starts_with(id.as_str()) && splice_inner(children, dir_id, level) {
                return true;
            }
        }
    }
    false
}

// Wire shape expected by the browser tree component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNode {
    id: String,
    name: String,
    is_selectable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    children: Option<Vec<TreeNode>>,
}

impl From<TreeNode> for WireNode {
    fn from(node: TreeNode) -> Self {
        match node {
            TreeNode::Directory { id, name, children } => WireNode {
                id,
                name,
                is_selectable: false,
                children: Some(children),
            },
            TreeNode::File { id, name } => WireNode {
                id,
                name,
                is_selectable: true,
                children: None,
            },
        }
    }
}

impl From<WireNode> for TreeNode {
    fn from(wire: WireNode) -> Self {
        match wire.children {
            Some(children) => TreeNode::Directory {
                id: wire.id,
                name: wire.name,
                children,
            },
            None if !wire.is_selectable => TreeNode::Directory {
                id: wire.id,
                name: wire.name,
                children: Vec::new(),
            },
            None => TreeNode::File {
                id: wire.id,
                name: wire.name,
            },
        }
    }
}
