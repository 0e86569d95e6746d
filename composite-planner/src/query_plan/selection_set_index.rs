//! Stable identities for selection sets.
//!
//! Every selection set of the planned operation gets a [`SelectionSetId`] up front. Planning
//! rewrites selection sets constantly (partitioning, merging requirements), and each rewrite is a
//! new allocation; registering the rewrite binds it to the Id of the selection set it was derived
//! from. Ids are keyed on allocation identity, so two structurally identical selection sets at
//! different places in the operation keep distinct Ids.
//!
//! The index is persistent: [`SelectionSetIndex::branch`] is O(1) and registrations made on a
//! branch are never visible to its siblings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::CompositeError;
use crate::error::SingleCompositeError;
use crate::internal_error;
use crate::operation::Operation;
use crate::operation::SelectionSet;

/// Layers deeper than this get flattened on [`SelectionSetIndexBuilder::build`].
const MAX_LAYER_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SelectionSetId(u32);

impl SelectionSetId {
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SelectionSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Keeps the selection set alive so its address cannot be handed out to another allocation
/// while the binding exists.
#[derive(Clone)]
struct Binding {
    id: SelectionSetId,
    _node: SelectionSet,
}

struct IndexLayer {
    parent: Option<Arc<IndexLayer>>,
    depth: usize,
    bindings: HashMap<usize, Binding>,
}

impl IndexLayer {
    fn get(&self, key: usize) -> Option<SelectionSetId> {
        let mut layer = Some(self);
        while let Some(current) = layer {
            if let Some(binding) = current.bindings.get(&key) {
                return Some(binding.id);
            }
            layer = current.parent.as_deref();
        }
        None
    }

    /// Collects every binding of the chain, newer layers taking precedence.
    fn flatten(&self) -> HashMap<usize, Binding> {
        let mut layers = Vec::with_capacity(self.depth + 1);
        let mut layer = Some(self);
        while let Some(current) = layer {
            layers.push(current);
            layer = current.parent.as_deref();
        }
        let mut bindings = HashMap::new();
        for layer in layers.into_iter().rev() {
            bindings.extend(layer.bindings.iter().map(|(key, binding)| (*key, binding.clone())));
        }
        bindings
    }
}

#[derive(Clone)]
pub struct SelectionSetIndex {
    layer: Arc<IndexLayer>,
    len: u32,
}

impl SelectionSetIndex {
    /// Assigns sequential Ids, starting at 1, to every selection set of the operation in
    /// pre-order.
    pub fn create(operation: &Operation) -> Self {
        let mut bindings = HashMap::new();
        let mut next = 0;
        operation
            .selection_set()
            .for_each_selection_set(&mut |selection_set| {
                next += 1;
                bindings.insert(
                    selection_set.identity(),
                    Binding {
                        id: SelectionSetId(next),
                        _node: selection_set.clone(),
                    },
                );
            });
        Self {
            layer: Arc::new(IndexLayer {
                parent: None,
                depth: 0,
                bindings,
            }),
            len: next,
        }
    }

    /// The number of distinct Ids.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get_id(&self, selection_set: &SelectionSet) -> Result<SelectionSetId, CompositeError> {
        self.try_get_id(selection_set)
            .ok_or_else(|| unregistered(selection_set))
    }

    pub fn try_get_id(&self, selection_set: &SelectionSet) -> Option<SelectionSetId> {
        self.layer.get(selection_set.identity())
    }

    pub fn branch(&self) -> SelectionSetIndexBuilder {
        SelectionSetIndexBuilder {
            base: self.layer.clone(),
            len: self.len,
            bindings: HashMap::new(),
        }
    }
}

impl fmt::Debug for SelectionSetIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionSetIndex")
            .field("len", &self.len)
            .field("depth", &self.layer.depth)
            .finish()
    }
}

/// Registrations on top of a [`SelectionSetIndex`], frozen into a new index by
/// [`SelectionSetIndexBuilder::build`].
pub struct SelectionSetIndexBuilder {
    base: Arc<IndexLayer>,
    len: u32,
    bindings: HashMap<usize, Binding>,
}

impl SelectionSetIndexBuilder {
    pub fn get_id(&self, selection_set: &SelectionSet) -> Result<SelectionSetId, CompositeError> {
        self.try_get_id(selection_set)
            .ok_or_else(|| unregistered(selection_set))
    }

    pub fn try_get_id(&self, selection_set: &SelectionSet) -> Option<SelectionSetId> {
        let key = selection_set.identity();
        self.bindings
            .get(&key)
            .map(|binding| binding.id)
            .or_else(|| self.base.get(key))
    }

    /// Binds `rewritten` to the Id of `original`.
    ///
    /// Registering the same pair twice is fine; binding a selection set that already has an Id to
    /// a different one is not.
    pub fn register(
        &mut self,
        original: &SelectionSet,
        rewritten: &SelectionSet,
    ) -> Result<SelectionSetId, CompositeError> {
        let id = self.get_id(original)?;
        match self.try_get_id(rewritten) {
            Some(existing) if existing == id => {}
            Some(existing) => {
                return Err(internal_error!(
                    "Cannot bind selection set `{rewritten}` to {id}: it is already bound to {existing}"
                ));
            }
            None => {
                self.bindings.insert(
                    rewritten.identity(),
                    Binding {
                        id,
                        _node: rewritten.clone(),
                    },
                );
            }
        }
        Ok(id)
    }

    /// Binds a selection set that does not derive from one of the operation, such as a copy of a
    /// field requirement, to an Id of its own.
    pub fn register_new(
        &mut self,
        selection_set: &SelectionSet,
    ) -> Result<SelectionSetId, CompositeError> {
        if let Some(existing) = self.try_get_id(selection_set) {
            return Err(internal_error!(
                "Cannot bind selection set `{selection_set}` to a new Id: it is already bound to {existing}"
            ));
        }
        self.len += 1;
        let id = SelectionSetId(self.len);
        self.bindings.insert(
            selection_set.identity(),
            Binding {
                id,
                _node: selection_set.clone(),
            },
        );
        Ok(id)
    }

    pub fn build(self) -> SelectionSetIndex {
        if self.bindings.is_empty() {
            return SelectionSetIndex {
                layer: self.base,
                len: self.len,
            };
        }
        let layer = if self.base.depth + 1 > MAX_LAYER_DEPTH {
            let mut bindings = self.base.flatten();
            bindings.extend(self.bindings);
            IndexLayer {
                parent: None,
                depth: 0,
                bindings,
            }
        } else {
            IndexLayer {
                depth: self.base.depth + 1,
                parent: Some(self.base),
                bindings: self.bindings,
            }
        };
        SelectionSetIndex {
            layer: Arc::new(layer),
            len: self.len,
        }
    }
}

fn unregistered(selection_set: &SelectionSet) -> CompositeError {
    SingleCompositeError::UnregisteredSelectionSet {
        selection_set: selection_set.to_string(),
    }
    .into()
}
