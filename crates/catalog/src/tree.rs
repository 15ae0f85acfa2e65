//! Ordered key/value tree used by the smart-merge writer.
//!
//! A record file is parsed into a [`Node`] instead of a fixed struct so that
//! keys the engine does not know about, and the order keys appear in, both
//! survive a rewrite.

use serde_yaml::{Mapping, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    Text(String),
    Seq(Vec<Node>),
    /// Insertion-ordered; keys are unique.
    Map(Vec<(Key, Node)>),
    /// Tags and other exotic YAML are carried through untouched.
    Raw(Value),
}

/// Mapping keys are almost always strings, but YAML allows any scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    Text(String),
    Other(Value),
}

impl Key {
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) => Key::Text(s),
            other => Key::Other(other),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Key::Text(s) => Value::String(s),
            Key::Other(v) => v,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Text(s) => Some(s),
            Key::Other(_) => None,
        }
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(b),
            Value::Number(n) => Node::Number(n),
            Value::String(s) => Node::Text(s),
            Value::Sequence(items) => Node::Seq(items.into_iter().map(Node::from).collect()),
            Value::Mapping(map) => Node::Map(
                map.into_iter()
                    .map(|(k, v)| (Key::from_value(k), Node::from(v)))
                    .collect(),
            ),
            tagged @ Value::Tagged(_) => Node::Raw(tagged),
        }
    }
}

impl From<Node> for Value {
    fn from(node: Node) -> Self {
        match node {
            Node::Null => Value::Null,
            Node::Bool(b) => Value::Bool(b),
            Node::Number(n) => Value::Number(n),
            Node::Text(s) => Value::String(s),
            Node::Seq(items) => Value::Sequence(items.into_iter().map(Value::from).collect()),
            Node::Map(entries) => {
                let mut map = Mapping::with_capacity(entries.len());
                for (k, v) in entries {
                    map.insert(k.into_value(), Value::from(v));
                }
                Value::Mapping(map)
            }
            Node::Raw(v) => v,
        }
    }
}

impl Node {
    pub fn parse(text: &str) -> serde_yaml::Result<Self> {
        let value: Value = serde_yaml::from_str(text)?;
        Ok(Node::from(value))
    }

    pub fn to_yaml(&self) -> serde_yaml::Result<String> {
        serde_yaml::to_string(&Value::from(self.clone()))
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        match self {
            Node::Map(entries) => entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Top-level key order of a mapping node.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Node::Map(entries) => entries.iter().filter_map(|(k, _)| k.as_str()).collect(),
            _ => Vec::new(),
        }
    }

    /// Overlays `incoming` onto `self`.
    ///
    /// When both sides are mappings: keys present in both are merged
    /// recursively in their existing position; keys only in `self` are kept;
    /// keys only in `incoming` are appended in their incoming order.  Any
    /// other combination replaces `self` with `incoming` outright.
    pub fn merge(&mut self, incoming: Node) {
        match (self, incoming) {
            (Node::Map(current), Node::Map(updates)) => {
                for (key, value) in updates {
                    match current.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, slot)) => slot.merge(value),
                        None => current.push((key, value)),
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_preserves_key_order() {
        let node = Node::parse("zeta: 1\nalpha: 2\nmid: 3\n").unwrap();
        assert_eq!(node.keys(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn merge_replaces_in_place_and_appends_new_keys() {
        let mut stored = Node::parse("name: m\nnotes: keep me\nstatus: stable\n").unwrap();
        let incoming = Node::parse("status: beta\nfamily: f\n").unwrap();
        stored.merge(incoming);

        assert_eq!(stored.keys(), vec!["name", "notes", "status", "family"]);
        assert_eq!(stored.get("status"), Some(&Node::Text("beta".to_string())));
        assert_eq!(stored.get("notes"), Some(&Node::Text("keep me".to_string())));
    }

    #[test]
    fn merge_recurses_into_nested_maps() {
        let mut stored =
            Node::parse("limits:\n  max_tokens: 8192\n  max_completion_tokens: 4096\n").unwrap();
        let incoming = Node::parse("limits:\n  max_tokens: 16384\n").unwrap();
        stored.merge(incoming);

        let limits = stored.get("limits").unwrap();
        assert_eq!(limits.keys(), vec!["max_tokens", "max_completion_tokens"]);
        assert_eq!(
            limits.get("max_tokens"),
            Some(&Node::Number(serde_yaml::Number::from(16384u64)))
        );
        assert_eq!(
            limits.get("max_completion_tokens"),
            Some(&Node::Number(serde_yaml::Number::from(4096u64)))
        );
    }

    #[test]
    fn sequences_are_replaced_not_merged() {
        let mut stored = Node::parse("capabilities: [chat, vision]\n").unwrap();
        stored.merge(Node::parse("capabilities: [chat]\n").unwrap());
        assert_eq!(
            stored.get("capabilities"),
            Some(&Node::Seq(vec![Node::Text("chat".to_string())]))
        );
    }

    #[test]
    fn serialization_keeps_merged_order() {
        let mut stored = Node::parse("b: 1\na: 2\n").unwrap();
        stored.merge(Node::parse("c: 3\na: 4\n").unwrap());
        assert_eq!(stored.to_yaml().unwrap(), "b: 1\na: 4\nc: 3\n");
    }
}
