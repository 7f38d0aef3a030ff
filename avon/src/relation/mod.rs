//! Relations between resources
//!
//! A [`Relation`] describes how related records are found; resolution is
//! batched over a whole result set (one query per relation, two through a
//! pivot) and split into a read-only [`Relation::lookup`] and an
//! [`Attachment::apply`] step. [`eager::load`] runs lookups concurrently.

mod descriptor;
pub mod eager;
mod pivot;
mod resolver;

pub use descriptor::{Authorizer, PivotDescriptor, Relation, RelationKind};
pub use eager::{load, load_eager};
pub use pivot::{PivotAttachment, PivotWriter};
pub use resolver::Attachment;
