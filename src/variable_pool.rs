//! Selector-keyed value store shared across a run.
//!
//! The pool maps a [`Selector`] to a [`Segment`]. Entries are added or
//! appended, never deleted: committed values stay readable for the rest of
//! the run, which is what makes concurrent reads by template resolution and
//! downstream nodes safe while the dispatcher remains the single writer.

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::segment::Segment;
use crate::types::{NodeId, Selector};

/// Mapping from selector to tagged value.
///
/// # Examples
///
/// ```rust
/// use flowmesh::segment::Segment;
/// use flowmesh::types::Selector;
/// use flowmesh::variable_pool::VariablePool;
///
/// let mut pool = VariablePool::new();
/// pool.add(Selector::of("llm", "text"), Segment::from("hello"));
/// assert!(pool.exists(&Selector::of("llm", "text")));
/// assert_eq!(
///     pool.get(&Selector::of("llm", "text")).unwrap().to_display_string(),
///     "hello"
/// );
/// ```
#[derive(Clone, Debug, Default)]
pub struct VariablePool {
    variables: FxHashMap<Selector, Segment>,
}

impl VariablePool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Store a value at a selector, replacing any previous value.
    ///
    /// In the common case each (node, field) is written exactly once, when
    /// the node's terminal event is applied.
    pub fn add(&mut self, selector: Selector, value: Segment) {
        self.variables.insert(selector, value);
    }

    /// Store a raw JSON value at a selector.
    pub fn add_value(&mut self, selector: Selector, value: &Value) {
        self.add(selector, Segment::from_value(value));
    }

    /// Append a value to the array at a selector, creating it if absent.
    ///
    /// Used for loop/iteration indices where a selector accumulates one
    /// entry per round.
    pub fn append(&mut self, selector: Selector, value: Segment) {
        let entry = self
            .variables
            .entry(selector)
            .or_insert_with(|| Segment::Array(Vec::new()));
        match entry {
            Segment::Array(items) => items.push(value),
            Segment::ArrayString(items) => match value {
                Segment::String(s) => items.push(s),
                other => {
                    let mut promoted: Vec<Segment> =
                        items.drain(..).map(Segment::String).collect();
                    promoted.push(other);
                    *entry = Segment::Array(promoted);
                }
            },
            Segment::None => *entry = Segment::Array(vec![value]),
            _ => {
                let prior = std::mem::replace(entry, Segment::None);
                *entry = Segment::Array(vec![prior, value]);
            }
        }
    }

    /// Read the value at a selector.
    #[must_use]
    pub fn get(&self, selector: &Selector) -> Option<&Segment> {
        self.variables.get(selector)
    }

    /// Whether a non-`None` value exists at a selector.
    #[must_use]
    pub fn exists(&self, selector: &Selector) -> bool {
        self.variables.get(selector).is_some_and(|s| !s.is_none())
    }

    /// All (field-path, value) pairs belonging to one node.
    pub fn node_variables(&self, node_id: &NodeId) -> Vec<(&Selector, &Segment)> {
        self.variables
            .iter()
            .filter(|(sel, _)| sel.node_id() == Some(node_id.as_str()))
            .collect()
    }

    /// Iterate over every entry in the pool.
    pub fn iter(&self) -> impl Iterator<Item = (&Selector, &Segment)> {
        self.variables.iter()
    }
}
