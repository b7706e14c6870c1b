use serde_json::Value;
use tokio::sync::broadcast;

use crate::{collection::DynamicCollection, node::FormNode};

/// The surface a controller needs from a state tree.
///
/// Implemented by plain nodes and by [`DynamicCollection`], whose
/// `patch_value` rebuilds its children instead of writing positionally.
pub trait FormModel: Clone + Send + Sync + 'static {
    fn value(&self) -> Value;
    fn patch_value(&self, value: &Value);
    fn reset(&self);
    fn mark_as_pristine(&self);
    fn is_dirty(&self) -> bool;
    fn is_valid(&self) -> bool;
    fn value_changes(&self) -> broadcast::Receiver<Value>;
}

impl FormModel for FormNode {
    fn value(&self) -> Value {
        FormNode::value(self)
    }

    fn patch_value(&self, value: &Value) {
        FormNode::patch_value(self, value)
    }

    fn reset(&self) {
        FormNode::reset(self)
    }

    fn mark_as_pristine(&self) {
        FormNode::mark_as_pristine(self)
    }

    fn is_dirty(&self) -> bool {
        FormNode::is_dirty(self)
    }

    fn is_valid(&self) -> bool {
        FormNode::is_valid(self)
    }

    fn value_changes(&self) -> broadcast::Receiver<Value> {
        FormNode::value_changes(self)
    }
}

impl FormModel for DynamicCollection {
    fn value(&self) -> Value {
        self.node().value()
    }

    fn patch_value(&self, value: &Value) {
        match value {
            Value::Array(items) => self.reconcile(items),
            _ => self.reconcile(&[]),
        }
    }

    fn reset(&self) {
        self.node().reset()
    }

    fn mark_as_pristine(&self) {
        self.node().mark_as_pristine()
    }

    fn is_dirty(&self) -> bool {
        self.node().is_dirty()
    }

    fn is_valid(&self) -> bool {
        self.node().is_valid()
    }

    fn value_changes(&self) -> broadcast::Receiver<Value> {
        self.node().value_changes()
    }
}
