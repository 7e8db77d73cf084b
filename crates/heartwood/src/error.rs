//! Error types and the error sink threaded through every fallible operation

use thiserror::Error;

/// Errors raised by the memory and locking core.
///
/// Every variant maps to a stable kind string (see [`CoreError::kind`])
/// which the error-reporting subsystem surfaces as a language-level
/// exception.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A private member was accessed from outside its class
    #[error("'{member}' is a private member of class '{class}'")]
    PrivateMember {
        /// Member name
        member: String,
        /// Class name
        class: String,
    },

    /// An undeclared member was accessed on a class with declared public members
    #[error("'{member}' is not a registered member of class '{class}'")]
    InvalidMember {
        /// Member name
        member: String,
        /// Class name
        class: String,
    },

    /// Operation attempted on an object that has already been deleted
    #[error("attempt to {action} an object of class '{class}' that has already been deleted")]
    ObjectDeleted {
        /// Class name
        class: String,
        /// What the caller tried to do
        action: &'static str,
    },

    /// Granting a lock would close a cycle in the wait-for graph
    #[error("TID {tid} cannot lock {resource}: it is held by TID {owner}, which is waiting on a lock held by TID {tid}")]
    Deadlock {
        /// Thread that attempted the lock
        tid: u64,
        /// Thread currently holding the lock
        owner: u64,
        /// Description of the lock
        resource: String,
    },

    /// A lock was released by a thread that does not own it
    #[error("TID {tid} tried to release {resource}, which it does not own")]
    NotOwner {
        /// Thread that attempted the release
        tid: u64,
        /// Description of the lock
        resource: String,
    },

    /// Assignment to a variable whose value was already finalized
    #[error("illegal assignment to variable '{name}' after second phase of variable destruction")]
    Finalized {
        /// Variable name
        name: String,
    },

    /// Assignment that violates a variable's type constraint
    #[error("variable '{name}' is declared as {expected}, but a value of type {got} was assigned")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Declared type
        expected: &'static str,
        /// Type of the assigned value
        got: &'static str,
    },

    /// No visible variable with this name
    #[error("variable '{name}' is not defined in this scope")]
    UndefinedVariable {
        /// Variable name
        name: String,
    },

    /// A closure tried to capture a variable that was not declared for closure use
    #[error("variable '{name}' cannot be captured: it was not declared as a closure variable")]
    NotShared {
        /// Variable name
        name: String,
    },

    /// Error raised by user code (constructor or destructor bodies)
    #[error("{kind}: {message}")]
    Raised {
        /// Exception kind
        kind: String,
        /// Human-readable description
        message: String,
    },
}

impl CoreError {
    /// Create a user-level error with an arbitrary kind string.
    pub fn raised(kind: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::Raised {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// The stable kind string for this error.
    pub fn kind(&self) -> &str {
        match self {
            CoreError::PrivateMember { .. } => "PRIVATE-MEMBER",
            CoreError::InvalidMember { .. } => "INVALID-MEMBER",
            CoreError::ObjectDeleted { .. } => "OBJECT-ALREADY-DELETED",
            CoreError::Deadlock { .. } => "THREAD-DEADLOCK",
            CoreError::NotOwner { .. } => "LOCK-ERROR",
            CoreError::Finalized { .. } => "DESTRUCTOR-ERROR",
            CoreError::TypeMismatch { .. } => "RUNTIME-TYPE-ERROR",
            CoreError::UndefinedVariable { .. } => "UNDEFINED-VARIABLE",
            CoreError::NotShared { .. } => "CLOSURE-ERROR",
            CoreError::Raised { kind, .. } => kind,
        }
    }

    /// Convert into a structured record for the error-reporting subsystem.
    pub fn to_record(&self) -> ErrorRecord {
        let message = match self {
            CoreError::Raised { message, .. } => message.clone(),
            other => other.to_string(),
        };
        ErrorRecord {
            kind: self.kind().to_string(),
            message,
        }
    }
}

/// A structured error record: kind string plus human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ErrorRecord {
    /// Exception kind, e.g. `THREAD-DEADLOCK`
    pub kind: String,
    /// Human-readable description
    pub message: String,
}

/// Result type alias for internal helpers
pub type Result<T> = std::result::Result<T, CoreError>;

/// Accumulates errors raised while an operation runs.
///
/// Operations record failures here and return a sentinel instead of
/// unwinding, so every lock and structural reference taken along the way
/// is released deterministically. Teardown keeps going after an error:
/// sibling members are still released and the object still reaches
/// `DELETED`.
#[derive(Debug, Default)]
pub struct ExceptionSink {
    errors: Vec<CoreError>,
}

impl ExceptionSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error.
    pub fn raise(&mut self, error: CoreError) {
        self.errors.push(error);
    }

    /// Record a user-level error.
    pub fn raise_kind(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.raise(CoreError::raised(kind, message));
    }

    /// Record the error of a failed result and return `None`, or unwrap a success.
    pub fn check<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                self.raise(e);
                None
            }
        }
    }

    /// True if nothing has been raised.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// True if at least one error has been raised.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of errors raised so far.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Iterate over the raised errors in order.
    pub fn iter(&self) -> impl Iterator<Item = &CoreError> {
        self.errors.iter()
    }

    /// The first error raised, if any.
    pub fn first(&self) -> Option<&CoreError> {
        self.errors.first()
    }

    /// True if an error with the given kind string was raised.
    pub fn contains_kind(&self, kind: &str) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }

    /// Remove and return all raised errors.
    pub fn take(&mut self) -> Vec<CoreError> {
        std::mem::take(&mut self.errors)
    }

    /// Structured records for every raised error.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.errors.iter().map(CoreError::to_record).collect()
    }

    /// Move every error from `other` into this sink.
    pub fn absorb(&mut self, mut other: ExceptionSink) {
        self.errors.append(&mut other.errors);
    }

    /// Log and drop everything raised; used where no caller sink exists.
    pub(crate) fn discard(self, context: &str) {
        for err in self.errors {
            log::warn!("{}: discarded {}: {}", context, err.kind(), err);
        }
    }
}
