//! The in-memory secret tree.
//!
//! A [`SecretDocument`] is a tree of string keys whose leaves are scalars.
//! Key order carries no meaning: children are kept in a `BTreeMap`, so the
//! canonical YAML text of a document is fully determined by its content.
//!
//! Null and empty-string leaves are never persisted. They are dropped when
//! text is parsed, and [`SecretDocument::prune_empty`] removes them (and any
//! subtree left empty) before a document is serialized or compared.
//!
//! Leaves are addressed with dot-delimited paths such as
//! `secrets.pipelineUser.token`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_yaml::Value;

use crate::error::DocumentError;

/// YAML shape of a freshly bootstrapped installation, before any value is set.
pub const DEFAULT_SEED_YAML: &str = "\
secrets:
  adminUser:
    username: \"\"
    password: \"\"
  hmacToken: \"\"
  pipelineUser:
    username: \"\"
    email: \"\"
    token: \"\"
";

/// A node in the secret tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Node {
    /// A nested mapping.
    Tree(BTreeMap<String, Node>),
    /// A scalar (or any other non-mapping YAML value).
    Leaf(Value),
}

impl Node {
    /// The leaf rendered as text, if this is a string, number or boolean.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Leaf(Value::String(s)) => Some(s.clone()),
            Self::Leaf(Value::Number(n)) => Some(n.to_string()),
            Self::Leaf(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        }
    }

    fn is_empty_leaf(&self) -> bool {
        match self {
            Self::Leaf(Value::Null) => true,
            Self::Leaf(Value::String(s)) => s.is_empty(),
            _ => false,
        }
    }
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        Self::Leaf(Value::String(value.to_owned()))
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        Self::Leaf(Value::String(value))
    }
}

/// An order-independent tree of secrets.
#[derive(Debug, Clone, Default)]
pub struct SecretDocument {
    root: BTreeMap<String, Node>,
}

impl SecretDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bootstrap seed: every expected entry present but empty.
    ///
    /// Once pruned this is the empty document; it is passed explicitly to
    /// `upsert_secrets` so the seed is part of each call's contract.
    #[must_use]
    pub fn default_seed() -> Self {
        let blank = |keys: &[&str]| {
            Node::Tree(keys.iter().map(|k| ((*k).to_owned(), Node::from(""))).collect())
        };
        let secrets = BTreeMap::from([
            ("adminUser".to_owned(), blank(&["username", "password"])),
            ("hmacToken".to_owned(), Node::from("")),
            ("pipelineUser".to_owned(), blank(&["username", "email", "token"])),
        ]);
        Self {
            root: BTreeMap::from([("secrets".to_owned(), Node::Tree(secrets))]),
        }
    }

    /// Parse YAML text into a document, dropping null and empty values.
    ///
    /// Blank text parses to the empty document.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Parse`] if the text is not YAML.
    /// - [`DocumentError::NotATree`] if the root is not a mapping.
    /// - [`DocumentError::InvalidKey`] if a key is itself a mapping or list.
    pub fn from_yaml(text: &str) -> Result<Self, DocumentError> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let value: Value = serde_yaml::from_str(text).map_err(|e| DocumentError::Parse {
            reason: e.to_string(),
        })?;
        match value {
            Value::Null => Ok(Self::new()),
            Value::Mapping(mapping) => Ok(Self {
                root: convert_mapping(mapping, "")?,
            }),
            _ => Err(DocumentError::NotATree {
                path: "<root>".to_owned(),
            }),
        }
    }

    /// Render the canonical YAML text: pruned, keys sorted.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Serialize`] if a leaf cannot be rendered.
    pub fn to_yaml(&self) -> Result<String, DocumentError> {
        let mut pruned = self.clone();
        pruned.prune_empty();
        serde_yaml::to_string(&pruned.root).map_err(|e| DocumentError::Serialize {
            reason: e.to_string(),
        })
    }

    /// Look up the node at a dotted path. Missing paths yield `None`.
    pub fn get(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split('.');
        let mut node = self.root.get(segments.next()?)?;
        for segment in segments {
            match node {
                Node::Tree(children) => node = children.get(segment)?,
                Node::Leaf(_) => return None,
            }
        }
        Some(node)
    }

    /// Look up a scalar at a dotted path, rendered as text.
    pub fn get_text(&self, path: &str) -> Option<String> {
        self.get(path).and_then(Node::as_text)
    }

    /// Set the node at a dotted path, creating intermediate trees.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::NotATree`] if an intermediate segment is an
    /// existing leaf; the leaf is left untouched.
    pub fn set(&mut self, path: &str, value: impl Into<Node>) -> Result<(), DocumentError> {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return Ok(());
        };
        let mut tree = &mut self.root;
        for (depth, segment) in parents.iter().enumerate() {
            let child = tree
                .entry((*segment).to_owned())
                .or_insert_with(|| Node::Tree(BTreeMap::new()));
            tree = match child {
                Node::Tree(children) => children,
                Node::Leaf(_) => {
                    return Err(DocumentError::NotATree {
                        path: parents[..=depth].join("."),
                    });
                }
            };
        }
        tree.insert((*last).to_owned(), value.into());
        Ok(())
    }

    /// Recursively remove null and empty-string leaves, then any subtree
    /// left with no children. Idempotent.
    pub fn prune_empty(&mut self) {
        prune_tree(&mut self.root);
    }

    /// Whether the document holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Combine two documents: every leaf in `overlay` wins, and every part
    /// of `base` that `overlay` does not mention is kept.
    #[must_use]
    pub fn combine_overlay(base: &Self, overlay: &Self) -> Self {
        let mut root = base.root.clone();
        overlay_tree(&mut root, &overlay.root);
        let mut combined = Self { root };
        combined.prune_empty();
        combined
    }

    /// Top-level entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Node)> {
        self.root.iter()
    }
}

impl PartialEq for SecretDocument {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.root.clone();
        let mut right = other.root.clone();
        prune_tree(&mut left);
        prune_tree(&mut right);
        left == right
    }
}

impl FromIterator<(String, Node)> for SecretDocument {
    fn from_iter<I: IntoIterator<Item = (String, Node)>>(iter: I) -> Self {
        Self {
            root: iter.into_iter().collect(),
        }
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

fn convert_mapping(
    mapping: serde_yaml::Mapping,
    prefix: &str,
) -> Result<BTreeMap<String, Node>, DocumentError> {
    let mut tree = BTreeMap::new();
    for (key, value) in mapping {
        let key = match key {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            other => {
                return Err(DocumentError::InvalidKey {
                    path: prefix.to_owned(),
                    reason: format!("non-scalar key of type {}", type_name(&other)),
                });
            }
        };
        let node = match value {
            Value::Mapping(children) => {
                let children = convert_mapping(children, &join_path(prefix, &key))?;
                if children.is_empty() {
                    continue;
                }
                Node::Tree(children)
            }
            leaf => Node::Leaf(leaf),
        };
        if !node.is_empty_leaf() {
            tree.insert(key, node);
        }
    }
    Ok(tree)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged",
    }
}

fn prune_tree(tree: &mut BTreeMap<String, Node>) {
    tree.retain(|_, node| match node {
        Node::Tree(children) => {
            prune_tree(children);
            !children.is_empty()
        }
        leaf => !leaf.is_empty_leaf(),
    });
}

fn overlay_tree(base: &mut BTreeMap<String, Node>, overlay: &BTreeMap<String, Node>) {
    for (key, node) in overlay {
        match (base.get_mut(key), node) {
            (Some(Node::Tree(base_children)), Node::Tree(overlay_children)) => {
                overlay_tree(base_children, overlay_children);
            }
            _ => {
                base.insert(key.clone(), node.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
secrets:
  adminUser:
    username: admin
    password: ''
  hmacToken: ~
  pipelineUser:
    username: bot
";

    #[test]
    fn parse_prunes_null_and_empty_leaves() {
        let doc = SecretDocument::from_yaml(SAMPLE).unwrap();
        assert_eq!(doc.get_text("secrets.adminUser.username").as_deref(), Some("admin"));
        assert!(doc.get("secrets.adminUser.password").is_none());
        assert!(doc.get("secrets.hmacToken").is_none());
    }

    #[test]
    fn canonical_text_sorts_keys_and_drops_empties() {
        let doc = SecretDocument::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            doc.to_yaml().unwrap(),
            "secrets:\n  adminUser:\n    username: admin\n  pipelineUser:\n    username: bot\n"
        );
    }

    #[test]
    fn blank_and_null_text_parse_to_empty() {
        assert!(SecretDocument::from_yaml("").unwrap().is_empty());
        assert!(SecretDocument::from_yaml("  \n").unwrap().is_empty());
        assert!(SecretDocument::from_yaml("~").unwrap().is_empty());
    }

    #[test]
    fn scalar_root_is_rejected() {
        let result = SecretDocument::from_yaml("just a string");
        assert!(matches!(result, Err(DocumentError::NotATree { .. })));
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        let result = SecretDocument::from_yaml("secrets: [unterminated");
        assert!(matches!(result, Err(DocumentError::Parse { .. })));
    }

    #[test]
    fn equality_ignores_key_order() {
        let a = SecretDocument::from_yaml("x: 1\ny:\n  b: 2\n  a: 3\n").unwrap();
        let b = SecretDocument::from_yaml("y:\n  a: 3\n  b: 2\nx: 1\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn equality_ignores_unpruned_empties() {
        let mut a = SecretDocument::from_yaml("x: 1\n").unwrap();
        a.set("y.z", "").unwrap();
        let b = SecretDocument::from_yaml("x: 1\n").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn get_missing_path_is_none() {
        let doc = SecretDocument::from_yaml(SAMPLE).unwrap();
        assert!(doc.get("secrets.nope.deeper").is_none());
        assert!(doc.get("secrets.adminUser.username.deeper").is_none());
    }

    #[test]
    fn set_creates_intermediate_nodes() {
        let mut doc = SecretDocument::new();
        doc.set("secrets.pipelineUser.token", "abc").unwrap();
        assert_eq!(doc.get_text("secrets.pipelineUser.token").as_deref(), Some("abc"));
    }

    #[test]
    fn set_through_leaf_fails() {
        let mut doc = SecretDocument::new();
        doc.set("secrets.hmacToken", "abc").unwrap();
        let result = doc.set("secrets.hmacToken.inner", "x");
        assert!(matches!(result, Err(DocumentError::NotATree { path }) if path == "secrets.hmacToken"));
        assert_eq!(doc.get_text("secrets.hmacToken").as_deref(), Some("abc"));
    }

    #[test]
    fn prune_is_idempotent_and_removes_empty_subtrees() {
        let mut doc = SecretDocument::default_seed();
        doc.set("secrets.hmacToken", "tok").unwrap();
        doc.prune_empty();
        let once = doc.clone();
        doc.prune_empty();
        assert_eq!(doc.to_yaml().unwrap(), once.to_yaml().unwrap());
        assert!(doc.get("secrets.adminUser").is_none());
        assert_eq!(doc.to_yaml().unwrap(), "secrets:\n  hmacToken: tok\n");
    }

    #[test]
    fn default_seed_holds_every_required_path() {
        let seed = SecretDocument::default_seed();
        for path in crate::verify::REQUIRED_PATHS {
            assert_eq!(seed.get_text(path).as_deref(), Some(""), "{path}");
        }
    }

    #[test]
    fn default_seed_prunes_to_empty() {
        let seed = SecretDocument::default_seed();
        assert_eq!(seed, SecretDocument::from_yaml(DEFAULT_SEED_YAML).unwrap());
        assert_eq!(seed.to_yaml().unwrap(), "{}\n");
    }

    #[test]
    fn overlay_wins_and_preserves_siblings() {
        let base = SecretDocument::from_yaml(
            "secrets:\n  adminUser:\n    username: admin\n    password: old\n  hmacToken: h\n",
        )
        .unwrap();
        let overlay =
            SecretDocument::from_yaml("secrets:\n  adminUser:\n    password: new\n").unwrap();
        let combined = SecretDocument::combine_overlay(&base, &overlay);
        assert_eq!(combined.get_text("secrets.adminUser.username").as_deref(), Some("admin"));
        assert_eq!(combined.get_text("secrets.adminUser.password").as_deref(), Some("new"));
        assert_eq!(combined.get_text("secrets.hmacToken").as_deref(), Some("h"));
    }

    #[test]
    fn overlay_leaf_replaces_subtree() {
        let base = SecretDocument::from_yaml("a:\n  b: 1\n").unwrap();
        let overlay = SecretDocument::from_yaml("a: flat\n").unwrap();
        let combined = SecretDocument::combine_overlay(&base, &overlay);
        assert_eq!(combined.get_text("a").as_deref(), Some("flat"));
    }

    #[test]
    fn non_string_scalars_survive_round_trip() {
        let doc = SecretDocument::from_yaml("port: 5432\nenabled: true\nname: '5432'\n").unwrap();
        assert_eq!(doc.get_text("port").as_deref(), Some("5432"));
        let reparsed = SecretDocument::from_yaml(&doc.to_yaml().unwrap()).unwrap();
        assert_eq!(doc, reparsed);
        assert!(matches!(reparsed.get("name"), Some(Node::Leaf(Value::String(_)))));
    }
}
