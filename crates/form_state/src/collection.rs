//! Index-addressable collection whose children are rebuilt from value lists.

use std::{fmt, sync::Arc};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::{
    error::FormError,
    node::{ChildFactory, FormNode},
};

/// An array node plus the factory used to build its children.
///
/// Every child is created from an owned copy of the value it is given, so
/// no caller-held value ever aliases collection state. The node keeps the
/// factory too, so a collection placed inside a group is still rebuilt when
/// the group is patched, and reset leaves it empty.
#[derive(Clone)]
pub struct DynamicCollection {
    node: FormNode,
    factory: ChildFactory,
}

impl Default for DynamicCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicCollection {
    pub fn new() -> Self {
        Self::with_factory(FormNode::control)
    }

    /// Collection whose children come from `factory`, e.g. groups carrying
    /// their own validators.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn(Value) -> FormNode + Send + Sync + 'static,
    {
        let factory: ChildFactory = Arc::new(factory);
        Self {
            node: FormNode::collection(Arc::clone(&factory)),
            factory,
        }
    }

    pub fn node(&self) -> &FormNode {
        &self.node
    }

    pub fn create_child(&self, value: Option<&Value>) -> FormNode {
        (self.factory)(value.cloned().unwrap_or(Value::Null))
    }

    /// Drops every child and builds one fresh child per element of `values`.
    ///
    /// This is a full rebuild: no child survives by reference, so any
    /// per-child state is lost. Do not call it on every keystroke.
    pub fn reconcile(&self, values: &[Value]) {
        let children: Vec<FormNode> = values
            .iter()
            .map(|value| self.create_child(Some(value)))
            .collect();
        let len = children.len();
        if self.edit("reconcile", self.node.set_children(children)).is_some() {
            debug!(collection = self.node.id().0, len, "collection reconciled");
        }
    }

    pub fn reconcile_from<T: Serialize>(&self, values: &[T]) -> Result<(), FormError> {
        let values = values
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FormError::Encode)?;
        self.reconcile(&values);
        Ok(())
    }

    /// Appends `child`, or a child holding `null` when none is given.
    /// Returns the new child's index.
    pub fn append(&self, child: Option<FormNode>) -> usize {
        let child = child.unwrap_or_else(|| self.create_child(None));
        self.edit("append", self.node.push(child))
            .unwrap_or_else(|| self.len().saturating_sub(1))
    }

    pub fn insert(&self, index: usize, child: FormNode) -> usize {
        self.edit("insert", self.node.insert(index, child))
            .unwrap_or(index)
    }

    /// In-place swap of the child at `index`; returns the replaced child.
    pub fn replace_at(&self, index: usize, child: FormNode) -> Result<FormNode, FormError> {
        self.node.replace_at(index, child)
    }

    pub fn remove_at(&self, index: usize) -> Option<FormNode> {
        self.edit("remove_at", self.node.remove_at(index)).flatten()
    }

    pub fn at(&self, index: usize) -> Option<FormNode> {
        self.node.at(index)
    }

    pub fn len(&self) -> usize {
        self.node.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_empty()
    }

    pub fn controls(&self) -> Vec<FormNode> {
        self.node.children()
    }

    pub fn values(&self) -> Vec<Value> {
        self.controls().iter().map(FormNode::value).collect()
    }

    pub fn values_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, FormError> {
        self.node.value_as()
    }

    fn edit<R>(&self, op: &'static str, result: Result<R, FormError>) -> Option<R> {
        result
            .map_err(|err| error!(collection = self.node.id().0, op, %err, "collection edit failed"))
            .ok()
    }
}

impl fmt::Debug for DynamicCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicCollection")
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "tests/collection_tests.rs"]
mod tests;
