//! Which fields are being edited right now.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFocus {
    pub name: String,
    pub focused: bool,
}

pub trait FocusQuery: Send + Sync {
    fn fields(&self) -> Vec<FieldFocus>;

    fn focused_names(&self) -> Vec<String> {
        self.fields()
            .into_iter()
            .filter(|field| field.focused)
            .map(|field| field.name)
            .collect()
    }
}

/// Shared registry the host updates from its input widgets.
#[derive(Debug, Default, Clone)]
pub struct FocusRegistry {
    fields: Arc<RwLock<BTreeMap<String, bool>>>,
}

impl FocusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>) {
        self.fields.write().entry(name.into()).or_insert(false);
    }

    pub fn unregister(&self, name: &str) {
        self.fields.write().remove(name);
    }

    pub fn focus(&self, name: impl Into<String>) {
        self.fields.write().insert(name.into(), true);
    }

    pub fn blur(&self, name: &str) {
        if let Some(focused) = self.fields.write().get_mut(name) {
            *focused = false;
        }
    }
}

impl FocusQuery for FocusRegistry {
    fn fields(&self) -> Vec<FieldFocus> {
        self.fields
            .read()
            .iter()
            .map(|(name, focused)| FieldFocus {
                name: name.clone(),
                focused: *focused,
            })
            .collect()
    }
}
