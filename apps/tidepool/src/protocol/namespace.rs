/// Directory tree snapshots from `LS`, discriminated by `ns_type`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ns_type", rename_all = "lowercase")]
pub enum NamespaceNode {
    Tree {
        children: Vec<NamespaceNode>,
    },
    Package {
        name: String,
        full_path: String,
        children: Vec<NamespaceNode>,
    },
    Module {
        name: String,
        full_path: String,
    },
}

impl NamespaceNode {
    /// Depth-first lookup of a module by short name or derived module name.
    pub fn find_module(&self, target: &str) -> Option<&NamespaceNode> {
        match self {
            NamespaceNode::Module { name, full_path } => {
                if name == target || module_name(full_path) == target {
                    Some(self)
                } else {
                    None
                }
            }
            NamespaceNode::Tree { children } | NamespaceNode::Package { children, .. } => {
                children.iter().find_map(|child| child.find_module(target))
            }
        }
    }
}

/// Derive the executable module identifier from a listing path: strip the
/// leading relative marker, drop the source extension, dot-separate.
pub fn module_name(full_path: &str) -> String {
    let trimmed = full_path.strip_prefix("./").unwrap_or(full_path);
    let trimmed = trimmed.strip_suffix(".py").unwrap_or(trimmed);
    trimmed.replace('/', ".")
}
