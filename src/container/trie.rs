//! An in-memory copy-on-write trie. Every mutation returns a new snapshot
//! that shares all untouched subtrees with its predecessor, so old snapshots
//! stay valid and readable for as long as anyone holds them.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Values are stored type-erased; `get` downcasts to the type the caller
/// asks for and misses on a mismatch.
type ValueRef = Arc<dyn Any + Send + Sync>;

/// One immutable trie node: a child per character, optionally a value. A
/// node carrying a value is a terminal for some key; it can still have
/// children below it.
#[derive(Default, Clone)]
struct TrieNode {
    children: BTreeMap<char, Arc<TrieNode>>,
    value: Option<ValueRef>,
}

/// A snapshot handle, nothing but a shared root. Cloning the handle is O(1)
/// and snapshots never change.
#[derive(Default, Clone)]
pub struct Trie {
    root: Option<Arc<TrieNode>>,
}

impl Trie {
    pub fn new() -> Trie {
        Trie { root: None }
    }

    /// Walk to the node of the key, if any.
    fn lookup(&self, key: &str) -> Option<&TrieNode> {
        let mut node = self.root.as_ref()?;
        for ch in key.chars() {
            node = node.children.get(&ch)?;
        }
        Some(node)
    }

    /// The value stored under the key, or None when the key is absent or its
    /// value is of a different type.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<&T> {
        let node = self.lookup(key)?;
        node.value.as_ref()?.downcast_ref::<T>()
    }

    /// Store a value, returning the new snapshot. Only the nodes on the key
    /// path are copied; everything else is shared with `self`.
    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: T) -> Trie {
        let value: ValueRef = Arc::new(value);
        let root = Self::put_path(self.root.as_deref(), key, value);
        Trie { root: Some(Arc::new(root)) }
    }

    fn put_path(node: Option<&TrieNode>, key: &str, value: ValueRef) -> TrieNode {
        // cloning a node copies the child map but shares every subtree
        let mut new_node = node.cloned().unwrap_or_default();
        let mut chars = key.chars();
        match chars.next() {
            None => new_node.value = Some(value),
            Some(ch) => {
                let child = new_node.children.get(&ch).map(|child| child.as_ref());
                let new_child = Self::put_path(child, chars.as_str(), value);
                new_node.children.insert(ch, Arc::new(new_child));
            }
        }
        new_node
    }

    /// Drop the value under the key, returning the new snapshot. Nodes left
    /// without value and children are pruned. When the key holds no value
    /// the trie comes back unchanged, sharing even the root.
    pub fn remove(&self, key: &str) -> Trie {
        match self.lookup(key) {
            Some(node) if node.value.is_some() => {}
            _ => return self.clone(),
        }
        let root = self.root.as_ref().map(|root| Self::remove_path(root, key));
        Trie { root: root.flatten().map(Arc::new) }
    }

    fn remove_path(node: &TrieNode, key: &str) -> Option<TrieNode> {
        let mut new_node = node.clone();
        let mut chars = key.chars();
        match chars.next() {
            None => new_node.value = None,
            Some(ch) => {
                if let Some(child) = node.children.get(&ch) {
                    match Self::remove_path(child, chars.as_str()) {
                        Some(new_child) => {
                            new_node.children.insert(ch, Arc::new(new_child));
                        }
                        None => {
                            new_node.children.remove(&ch);
                        }
                    }
                }
            }
        }
        if new_node.value.is_none() && new_node.children.is_empty() {
            return None;
        }
        Some(new_node)
    }
}
