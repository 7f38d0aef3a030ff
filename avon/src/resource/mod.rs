//! Resources: repositories with fields, filters, orderings and a policy

mod definition;
mod field;
mod policy;
mod registry;

pub use definition::Resource;
pub use field::{Field, FillFn};
pub use policy::{Ability, Policy, PolicyHandler};
pub use registry::ResourceRegistry;
