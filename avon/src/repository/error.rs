//! Repository error types
//!
//! Structured errors for repository operations. Every backend reports failures
//! through [`RepositoryError`] so callers can branch on [`RepositoryErrorKind`]
//! without knowing which storage produced them.
//!
//! # Example
//!
//! ```rust
//! use avon::repository::{RepositoryError, RepositoryErrorKind};
//!
//! let error = RepositoryError::not_found("posts", "42");
//! assert!(matches!(error.kind, RepositoryErrorKind::NotFound));
//! assert!(error.entity_id.is_some());
//! ```

use std::fmt;

/// Operation being performed when the repository error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryOperation {
    /// Finding a single record by primary key
    Find,
    /// Listing records matching the accumulated query
    All,
    /// Fetching the head of the accumulated query
    First,
    /// Free-text, paginated search
    Search,
    /// Counting records matching the accumulated query
    Count,
    /// Inserting a new record
    Store,
    /// Replacing an existing record
    Update,
    /// Deleting a record (physical delete)
    Delete,
    /// Marking a record as deleted
    SoftDelete,
    /// Physically deleting a record regardless of soft-delete state
    ForceDelete,
    /// Clearing the soft-delete marker
    Restore,
    /// Opening, committing or rolling back a transaction
    Transaction,
    /// Resolving a relation over a batch of parents
    Resolve,
    /// Replacing the pivot rows of a many-to-many relation
    Attach,
}

impl fmt::Display for RepositoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Find => write!(f, "find"),
            Self::All => write!(f, "all"),
            Self::First => write!(f, "first"),
            Self::Search => write!(f, "search"),
            Self::Count => write!(f, "count"),
            Self::Store => write!(f, "store"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::SoftDelete => write!(f, "soft_delete"),
            Self::ForceDelete => write!(f, "force_delete"),
            Self::Restore => write!(f, "restore"),
            Self::Transaction => write!(f, "transaction"),
            Self::Resolve => write!(f, "resolve"),
            Self::Attach => write!(f, "attach"),
        }
    }
}

/// Category of repository error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepositoryErrorKind {
    /// Record was not found
    NotFound,
    /// Record already exists (duplicate key)
    AlreadyExists,
    /// Storage constraint violation
    ConstraintViolation,
    /// Validation failed before the storage was touched
    ValidationFailed,
    /// Failed to connect to the storage
    ConnectionFailed,
    /// Operation timed out
    Timeout,
    /// Underlying storage error
    DatabaseError,
    /// Serialization or deserialization error
    SerializationError,
    /// The caller broke a usage contract (nested transaction, restore without soft deletes, ...)
    InvariantViolation,
    /// Other unclassified error
    Other,
}

impl fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not_found"),
            Self::AlreadyExists => write!(f, "already_exists"),
            Self::ConstraintViolation => write!(f, "constraint_violation"),
            Self::ValidationFailed => write!(f, "validation_failed"),
            Self::ConnectionFailed => write!(f, "connection_failed"),
            Self::Timeout => write!(f, "timeout"),
            Self::DatabaseError => write!(f, "database_error"),
            Self::SerializationError => write!(f, "serialization_error"),
            Self::InvariantViolation => write!(f, "invariant_violation"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Structured repository error with operation context
///
/// Carries what operation failed, why, and which resource, record and relation
/// were involved.
///
/// # Example
///
/// ```rust
/// use avon::repository::{RepositoryError, RepositoryOperation};
///
/// let error = RepositoryError::not_found("posts", "42").with_operation(RepositoryOperation::Update);
/// assert_eq!(
///     error.to_string(),
///     "Repository not_found error during update: Record not found [posts: 42]"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryError {
    /// The operation being performed when the error occurred
    pub operation: RepositoryOperation,
    /// The category of error
    pub kind: RepositoryErrorKind,
    /// Human-readable error message
    pub message: String,
    /// The resource involved (e.g. "posts")
    pub entity_type: Option<String>,
    /// The primary key of the record involved
    pub entity_id: Option<String>,
    /// The relation being resolved or attached
    pub relation: Option<String>,
}

impl RepositoryError {
    /// Create a new repository error
    pub fn new(
        operation: RepositoryOperation,
        kind: RepositoryErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            kind,
            message: message.into(),
            entity_type: None,
            entity_id: None,
            relation: None,
        }
    }

    /// Create a "not found" error with record context
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Find,
            RepositoryErrorKind::NotFound,
            "Record not found",
        )
        .with_entity(entity_type, entity_id)
    }

    /// Create an "already exists" error with record context
    pub fn already_exists(entity_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Store,
            RepositoryErrorKind::AlreadyExists,
            "Record already exists",
        )
        .with_entity(entity_type, identifier)
    }

    /// Create a validation failed error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(
            RepositoryOperation::Store,
            RepositoryErrorKind::ValidationFailed,
            message,
        )
    }

    /// Create a storage error
    pub fn database_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::DatabaseError, message)
    }

    /// Create a serialization error
    pub fn serialization_error(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::SerializationError, message)
    }

    /// Create an invariant violation error
    ///
    /// # Example
    ///
    /// ```rust
    /// use avon::repository::{RepositoryError, RepositoryErrorKind, RepositoryOperation};
    ///
    /// let error = RepositoryError::invariant_violation(
    ///     RepositoryOperation::Transaction,
    ///     "a transaction is already active",
    /// );
    /// assert_eq!(error.kind, RepositoryErrorKind::InvariantViolation);
    /// ```
    pub fn invariant_violation(operation: RepositoryOperation, message: impl Into<String>) -> Self {
        Self::new(operation, RepositoryErrorKind::InvariantViolation, message)
    }

    /// Add record context to an existing error
    #[must_use]
    pub fn with_entity(
        mut self,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Add the resource name without a record key
    #[must_use]
    pub fn with_resource(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    /// Add the relation being resolved or attached
    #[must_use]
    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    /// Set the operation that caused the error
    #[must_use]
    pub fn with_operation(mut self, operation: RepositoryOperation) -> Self {
        self.operation = operation;
        self
    }

    /// Check if this error is retriable (transient errors that may succeed on retry)
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind,
            RepositoryErrorKind::ConnectionFailed | RepositoryErrorKind::Timeout
        )
    }
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Repository {} error during {}: {}",
            self.kind, self.operation, self.message
        )?;
        match (&self.entity_type, &self.entity_id) {
            (Some(entity_type), Some(entity_id)) => write!(f, " [{}: {}]", entity_type, entity_id)?,
            (Some(entity_type), None) => write!(f, " [{}]", entity_type)?,
            _ => {}
        }
        if let Some(ref relation) = self.relation {
            write!(f, " (relation: {})", relation)?;
        }
        Ok(())
    }
}

impl std::error::Error for RepositoryError {}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_error(RepositoryOperation::All, err.to_string())
    }
}
