//! State nodes holding JSON-shaped values.
//!
//! A [`FormNode`] is a cheap, clonable handle. Clones share the same node, so
//! a tree can be edited from a UI layer while a controller task observes it.
//! Composite values are composed from the children on every read.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::{
    domain::{NodeId, NodeKind},
    error::{FormError, ValidationError},
};

const VALUE_CHANGES_CAPACITY: usize = 64;

pub type Validator = Arc<dyn Fn(&Value) -> Option<ValidationError> + Send + Sync>;

/// Builds one collection child from an owned value.
pub type ChildFactory = Arc<dyn Fn(Value) -> FormNode + Send + Sync>;

#[derive(Clone)]
pub struct FormNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    id: NodeId,
    state: Mutex<NodeState>,
    parent: Mutex<Weak<NodeInner>>,
    changes: broadcast::Sender<Value>,
}

struct NodeState {
    body: NodeBody,
    dirty: bool,
    validators: Vec<Validator>,
}

enum NodeBody {
    Control { value: Value, default: Value },
    Group(BTreeMap<String, FormNode>),
    /// `factory` is set for collections: writes rebuild the children from
    /// it and reset empties the array.
    Array {
        children: Vec<FormNode>,
        factory: Option<ChildFactory>,
    },
}

impl NodeBody {
    fn children(&self) -> Vec<FormNode> {
        match self {
            NodeBody::Control { .. } => Vec::new(),
            NodeBody::Group(children) => children.values().cloned().collect(),
            NodeBody::Array { children, .. } => children.clone(),
        }
    }
}

enum Shape {
    Leaf(Value),
    Named(Vec<(String, FormNode)>),
    Indexed(Vec<FormNode>),
}

enum Write<'a> {
    Fields(Vec<(FormNode, &'a Value)>),
    Rebuild(ChildFactory, &'a [Value]),
}

impl FormNode {
    fn from_body(body: NodeBody) -> Self {
        let (changes, _) = broadcast::channel(VALUE_CHANGES_CAPACITY);
        let node = Self {
            inner: Arc::new(NodeInner {
                id: NodeId::next(),
                state: Mutex::new(NodeState {
                    body,
                    dirty: false,
                    validators: Vec::new(),
                }),
                parent: Mutex::new(Weak::new()),
                changes,
            }),
        };
        for child in node.children() {
            child.attach_to(&node);
        }
        node
    }

    /// Leaf node whose reset value is the value it was created with.
    pub fn control(value: Value) -> Self {
        let default = value.clone();
        Self::from_body(NodeBody::Control { value, default })
    }

    pub fn control_with_default(value: Value, default: Value) -> Self {
        Self::from_body(NodeBody::Control { value, default })
    }

    pub fn group<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = (S, FormNode)>,
        S: Into<String>,
    {
        let children = children
            .into_iter()
            .map(|(name, child)| (name.into(), child))
            .collect();
        Self::from_body(NodeBody::Group(children))
    }

    pub fn array(children: Vec<FormNode>) -> Self {
        Self::from_body(NodeBody::Array {
            children,
            factory: None,
        })
    }

    /// Empty array whose children are rebuilt through `factory` whenever a
    /// list is written into it, also when the write comes from an ancestor.
    pub fn collection(factory: ChildFactory) -> Self {
        Self::from_body(NodeBody::Array {
            children: Vec::new(),
            factory: Some(factory),
        })
    }

    pub fn with_validator<V>(self, validator: V) -> Self
    where
        V: Fn(&Value) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.add_validator(validator);
        self
    }

    pub fn add_validator<V>(&self, validator: V)
    where
        V: Fn(&Value) -> Option<ValidationError> + Send + Sync + 'static,
    {
        self.inner.state.lock().validators.push(Arc::new(validator));
    }

    pub fn clear_validators(&self) {
        self.inner.state.lock().validators.clear();
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn kind(&self) -> NodeKind {
        match self.inner.state.lock().body {
            NodeBody::Control { .. } => NodeKind::Control,
            NodeBody::Group(_) => NodeKind::Group,
            NodeBody::Array { .. } => NodeKind::Array,
        }
    }

    /// True when both handles point at the same node.
    pub fn ptr_eq(&self, other: &FormNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn shape(&self) -> Shape {
        let state = self.inner.state.lock();
        match &state.body {
            NodeBody::Control { value, .. } => Shape::Leaf(value.clone()),
            NodeBody::Group(children) => Shape::Named(
                children
                    .iter()
                    .map(|(name, child)| (name.clone(), child.clone()))
                    .collect(),
            ),
            NodeBody::Array { children, .. } => Shape::Indexed(children.clone()),
        }
    }

    pub fn value(&self) -> Value {
        match self.shape() {
            Shape::Leaf(value) => value,
            Shape::Named(children) => Value::Object(
                children
                    .into_iter()
                    .map(|(name, child)| (name, child.value()))
                    .collect::<Map<String, Value>>(),
            ),
            Shape::Indexed(children) => Value::Array(children.iter().map(FormNode::value).collect()),
        }
    }

    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, FormError> {
        serde_json::from_value(self.value()).map_err(FormError::Decode)
    }

    pub fn children(&self) -> Vec<FormNode> {
        self.inner.state.lock().body.children()
    }

    pub fn get(&self, name: &str) -> Option<FormNode> {
        match &self.inner.state.lock().body {
            NodeBody::Group(children) => children.get(name).cloned(),
            _ => None,
        }
    }

    pub fn at(&self, index: usize) -> Option<FormNode> {
        match &self.inner.state.lock().body {
            NodeBody::Array { children, .. } => children.get(index).cloned(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        match &self.inner.state.lock().body {
            NodeBody::Control { .. } => 0,
            NodeBody::Group(children) => children.len(),
            NodeBody::Array { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self) -> Option<FormNode> {
        self.inner
            .parent
            .lock()
            .upgrade()
            .map(|inner| FormNode { inner })
    }

    /// Replaces the value of a control, or patches a composite with `value`.
    pub fn set_value(&self, value: Value) {
        self.write(&value);
        self.notify();
    }

    /// Writes `value` into this node. Groups only take keys naming existing
    /// children and plain arrays only take existing indices; everything else
    /// is left untouched. Collections, nested ones included, are rebuilt from
    /// the written list. Written leaves and rebuilt collections become dirty.
    pub fn patch_value(&self, value: &Value) {
        self.write(value);
        self.notify();
    }

    fn write(&self, value: &Value) {
        let write = {
            let mut guard = self.inner.state.lock();
            let NodeState { body, dirty, .. } = &mut *guard;
            match body {
                NodeBody::Control { value: current, .. } => {
                    *current = value.clone();
                    *dirty = true;
                    return;
                }
                NodeBody::Group(children) => {
                    let Value::Object(fields) = value else {
                        return;
                    };
                    Write::Fields(
                        fields
                            .iter()
                            .filter_map(|(name, field)| {
                                children.get(name).map(|child| (child.clone(), field))
                            })
                            .collect(),
                    )
                }
                NodeBody::Array { children, factory } => {
                    let Value::Array(items) = value else {
                        return;
                    };
                    match factory {
                        Some(factory) => {
                            *dirty = true;
                            Write::Rebuild(Arc::clone(factory), items.as_slice())
                        }
                        None => Write::Fields(children.iter().cloned().zip(items.iter()).collect()),
                    }
                }
            }
        };

        match write {
            Write::Fields(targets) => {
                for (child, field) in targets {
                    child.write(field);
                }
            }
            Write::Rebuild(factory, items) => {
                let children = items.iter().map(|item| factory(item.clone())).collect();
                // Only array bodies produce a rebuild.
                let _ = self.swap_children(children);
            }
        }
    }

    /// Restores every leaf to its default, empties collections and marks the
    /// subtree pristine.
    pub fn reset(&self) {
        self.reset_silently();
        self.notify();
    }

    fn reset_silently(&self) {
        let children = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.dirty = false;
            match &mut state.body {
                NodeBody::Control { value, default } => {
                    *value = default.clone();
                    return;
                }
                NodeBody::Array {
                    children,
                    factory: Some(_),
                } => {
                    for child in children.drain(..) {
                        child.detach();
                    }
                    return;
                }
                body => body.children(),
            }
        };
        for child in children {
            child.reset_silently();
        }
    }

    pub fn is_dirty(&self) -> bool {
        let (dirty, children) = {
            let state = self.inner.state.lock();
            (state.dirty, state.body.children())
        };
        dirty || children.iter().any(FormNode::is_dirty)
    }

    pub fn is_pristine(&self) -> bool {
        !self.is_dirty()
    }

    pub fn mark_as_dirty(&self) {
        self.inner.state.lock().dirty = true;
    }

    /// Clears dirty flags on the whole subtree. Emits no value change.
    pub fn mark_as_pristine(&self) {
        let children = {
            let mut state = self.inner.state.lock();
            state.dirty = false;
            state.body.children()
        };
        for child in children {
            child.mark_as_pristine();
        }
    }

    pub fn validation_errors(&self) -> Vec<ValidationError> {
        let (validators, children) = {
            let state = self.inner.state.lock();
            (state.validators.clone(), state.body.children())
        };

        let mut errors = Vec::new();
        if !validators.is_empty() {
            let value = self.value();
            errors.extend(validators.iter().filter_map(|validator| validator(&value)));
        }
        for child in children {
            errors.extend(child.validation_errors());
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors().is_empty()
    }

    pub fn is_invalid(&self) -> bool {
        !self.is_valid()
    }

    /// Composed value of this node after every write, reset or structural edit
    /// touching it or its descendants.
    pub fn value_changes(&self) -> broadcast::Receiver<Value> {
        self.inner.changes.subscribe()
    }

    pub fn push(&self, child: FormNode) -> Result<usize, FormError> {
        let index = self.with_array(|children| {
            children.push(child.clone());
            children.len() - 1
        })?;
        child.attach_to(self);
        self.notify();
        Ok(index)
    }

    /// Inserts at `index`, clamped to the current length.
    pub fn insert(&self, index: usize, child: FormNode) -> Result<usize, FormError> {
        let index = self.with_array(|children| {
            let index = index.min(children.len());
            children.insert(index, child.clone());
            index
        })?;
        child.attach_to(self);
        self.notify();
        Ok(index)
    }

    /// Removes the child at `index`. Out-of-range indices are a no-op.
    pub fn remove_at(&self, index: usize) -> Result<Option<FormNode>, FormError> {
        let removed = self.with_array(|children| {
            (index < children.len()).then(|| children.remove(index))
        })?;
        if let Some(child) = &removed {
            child.detach();
            self.notify();
        }
        Ok(removed)
    }

    /// Swaps the child at `index` for `child`, keeping sibling positions.
    pub fn replace_at(&self, index: usize, child: FormNode) -> Result<FormNode, FormError> {
        let previous = self.with_array(|children| {
            let len = children.len();
            children
                .get_mut(index)
                .map(|slot| std::mem::replace(slot, child.clone()))
                .ok_or(FormError::IndexOutOfRange { index, len })
        })??;
        previous.detach();
        child.attach_to(self);
        self.notify();
        Ok(previous)
    }

    /// Replaces the whole child list with a single notification.
    pub fn set_children(&self, children: Vec<FormNode>) -> Result<Vec<FormNode>, FormError> {
        let previous = self.swap_children(children)?;
        self.notify();
        Ok(previous)
    }

    fn swap_children(&self, children: Vec<FormNode>) -> Result<Vec<FormNode>, FormError> {
        let previous = self.with_array(|current| std::mem::replace(current, children.clone()))?;
        for child in &previous {
            child.detach();
        }
        for child in &children {
            child.attach_to(self);
        }
        Ok(previous)
    }

    fn with_array<R>(&self, edit: impl FnOnce(&mut Vec<FormNode>) -> R) -> Result<R, FormError> {
        let mut state = self.inner.state.lock();
        match &mut state.body {
            NodeBody::Array { children, .. } => Ok(edit(children)),
            _ => Err(FormError::NotAnArray(self.inner.id)),
        }
    }

    fn attach_to(&self, parent: &FormNode) {
        *self.inner.parent.lock() = Arc::downgrade(&parent.inner);
    }

    fn detach(&self) {
        *self.inner.parent.lock() = Weak::new();
    }

    fn notify(&self) {
        let mut node = Some(self.clone());
        while let Some(current) = node {
            if current.inner.changes.receiver_count() > 0 {
                let _ = current.inner.changes.send(current.value());
            }
            node = current.parent();
        }
    }
}

impl fmt::Debug for FormNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormNode")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("value", &self.value())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
#[path = "tests/node_tests.rs"]
mod tests;
