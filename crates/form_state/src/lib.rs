//! In-memory form state: nodes, groups, arrays and the dynamic collection.

pub mod collection;
pub mod domain;
pub mod error;
pub mod model;
pub mod node;

pub use collection::DynamicCollection;
pub use domain::{NodeId, NodeKind};
pub use error::{FormError, ValidationCode, ValidationError};
pub use model::FormModel;
pub use node::{ChildFactory, FormNode, Validator};
