//! Per-request context passed through resolvers, filters and policies

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Opaque request context
///
/// Carries the acting user (whatever type the application uses) without the
/// library knowing its shape.
///
/// # Example
///
/// ```rust
/// use avon::context::RequestContext;
///
/// struct User { id: i64, admin: bool }
///
/// let ctx = RequestContext::with_actor(User { id: 7, admin: true });
/// assert_eq!(ctx.actor::<User>().map(|u| u.id), Some(7));
/// assert!(ctx.actor::<String>().is_none());
/// assert!(RequestContext::anonymous().actor::<User>().is_none());
/// ```
#[derive(Clone, Default)]
pub struct RequestContext {
    actor: Option<Arc<dyn Any + Send + Sync>>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_actor<T: Any + Send + Sync>(actor: T) -> Self {
        Self {
            actor: Some(Arc::new(actor)),
        }
    }

    /// The actor, if one is set and has type `T`
    pub fn actor<T: Any>(&self) -> Option<&T> {
        self.actor.as_deref().and_then(|a| a.downcast_ref::<T>())
    }

    pub fn is_anonymous(&self) -> bool {
        self.actor.is_none()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("anonymous", &self.is_anonymous())
            .finish()
    }
}
