//! Persistent collections backing the planner's immutable search states.
//!
//! Forking a candidate plan clones these in O(1); every "mutation" returns a new value and
//! leaves the original (and whoever shares it) untouched.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::ser::SerializeSeq;

/// A singly linked, structurally shared stack.
pub(crate) struct PersistentStack<T> {
    head: Option<Arc<StackNode<T>>>,
    len: usize,
}

struct StackNode<T> {
    value: T,
    next: Option<Arc<StackNode<T>>>,
}

impl<T> PersistentStack<T> {
    pub(crate) const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    pub(crate) const fn len(&self) -> usize {
        self.len
    }

    pub(crate) const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub(crate) fn push(&self, value: T) -> Self {
        Self {
            head: Some(Arc::new(StackNode {
                value,
                next: self.head.clone(),
            })),
            len: self.len + 1,
        }
    }

    /// Returns the top of the stack along with the stack that remains once it is removed.
    pub(crate) fn pop(&self) -> Option<(&T, Self)> {
        let head = self.head.as_ref()?;
        Some((
            &head.value,
            Self {
                head: head.next.clone(),
                len: self.len - 1,
            },
        ))
    }

    /// Iterates from the top of the stack down.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        let mut current = self.head.as_deref();
        std::iter::from_fn(move || {
            let node = current?;
            current = node.next.as_deref();
            Some(&node.value)
        })
    }
}

impl<T> Clone for PersistentStack<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
            len: self.len,
        }
    }
}

impl<T> Default for PersistentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentStack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Serialize> Serialize for PersistentStack<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.len))?;
        for value in self.iter() {
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

/// A copy-on-write list of shared elements.
///
/// Appending or replacing copies the spine (a vector of `Arc`s), never the elements.
pub(crate) struct PersistentList<T> {
    items: Arc<Vec<Arc<T>>>,
}

impl<T> PersistentList<T> {
    pub(crate) fn new() -> Self {
        Self {
            items: Arc::new(Vec::new()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Arc<T>> {
        self.items.get(index)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.items.iter()
    }

    #[must_use]
    pub(crate) fn push(&self, value: T) -> Self {
        let mut items = Vec::with_capacity(self.items.len() + 1);
        items.extend(self.items.iter().cloned());
        items.push(Arc::new(value));
        Self {
            items: Arc::new(items),
        }
    }

    /// Returns a list where the element at `index` is swapped for `value`.
    ///
    /// Out-of-range indices leave the list unchanged.
    #[must_use]
    pub(crate) fn replace(&self, index: usize, value: T) -> Self {
        if index >= self.items.len() {
            return self.clone();
        }
        let mut items = self.items.as_ref().clone();
        items[index] = Arc::new(value);
        Self {
            items: Arc::new(items),
        }
    }
}

impl<T> Clone for PersistentList<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T> Default for PersistentList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Serialize> Serialize for PersistentList<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for value in self.iter() {
            seq.serialize_element(value.as_ref())?;
        }
        seq.end()
    }
}
