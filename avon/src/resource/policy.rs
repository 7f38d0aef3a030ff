//! Authorization table: one optional handler per ability
//!
//! A missing handler allows the action.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::model::Model;

/// Actions a policy can guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ability {
    ViewAny,
    View,
    Create,
    Update,
    Delete,
    ForceDelete,
    Restore,
    Attach,
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ViewAny => write!(f, "view_any"),
            Self::View => write!(f, "view"),
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::ForceDelete => write!(f, "force_delete"),
            Self::Restore => write!(f, "restore"),
            Self::Attach => write!(f, "attach"),
        }
    }
}

/// Policy handler; receives the record for record-level abilities
pub type PolicyHandler = Arc<dyn Fn(&RequestContext, Option<&Model>) -> bool + Send + Sync>;

/// Ability → handler table
///
/// # Example
///
/// ```rust
/// use avon::context::RequestContext;
/// use avon::resource::{Ability, Policy};
///
/// struct User { admin: bool }
///
/// let policy = Policy::new()
///     .allow(Ability::Delete, |ctx, _| ctx.actor::<User>().is_some_and(|u| u.admin));
///
/// let guest = RequestContext::anonymous();
/// assert!(!policy.check(&guest, Ability::Delete, None));
/// assert!(policy.check(&guest, Ability::View, None));
/// assert!(policy.check(&RequestContext::with_actor(User { admin: true }), Ability::Delete, None));
/// ```
#[derive(Clone, Default)]
pub struct Policy {
    handlers: HashMap<Ability, PolicyHandler>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard `ability` with `handler`
    #[must_use]
    pub fn allow<F>(mut self, ability: Ability, handler: F) -> Self
    where
        F: Fn(&RequestContext, Option<&Model>) -> bool + Send + Sync + 'static,
    {
        self.handlers.insert(ability, Arc::new(handler));
        self
    }

    /// Forbid `ability` outright
    #[must_use]
    pub fn deny(self, ability: Ability) -> Self {
        self.allow(ability, |_, _| false)
    }

    pub fn check(&self, ctx: &RequestContext, ability: Ability, model: Option<&Model>) -> bool {
        self.handlers
            .get(&ability)
            .map_or(true, |handler| handler(ctx, model))
    }

    /// [`Policy::check`] as a `Result`
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        ability: Ability,
        model: Option<&Model>,
    ) -> Result<()> {
        if self.check(ctx, ability, model) {
            Ok(())
        } else {
            tracing::debug!(%ability, "policy denied");
            Err(Error::Forbidden(format!("not allowed to {}", ability)))
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut abilities: Vec<_> = self.handlers.keys().map(ToString::to_string).collect();
        abilities.sort();
        f.debug_struct("Policy").field("guarded", &abilities).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_handler_allows() {
        let policy = Policy::new();
        assert!(policy.check(&RequestContext::anonymous(), Ability::ForceDelete, None));
        assert!(policy.authorize(&RequestContext::anonymous(), Ability::Attach, None).is_ok());
    }

    #[test]
    fn test_deny_is_forbidden() {
        let policy = Policy::new().deny(Ability::Restore);
        let err = policy
            .authorize(&RequestContext::anonymous(), Ability::Restore, None)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
        assert!(format!("{:?}", policy).contains("restore"));
    }

    #[test]
    fn test_record_level_handler() {
        let policy = Policy::new().allow(Ability::View, |_, model| {
            model.and_then(|m| m.get("public")).and_then(|v| v.as_bool()) == Some(true)
        });
        let public = Model::new("id").with("public", true);
        let private = Model::new("id").with("public", false);
        let ctx = RequestContext::anonymous();
        assert!(policy.check(&ctx, Ability::View, Some(&public)));
        assert!(!policy.check(&ctx, Ability::View, Some(&private)));
    }
}
