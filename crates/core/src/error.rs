//! Kernel error model.

use thiserror::Error;

use crate::adapter::AdaptError;
use crate::container::InjectError;

/// Result type used across the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

/// Coarse classification of a [`KernelError`].
///
/// The dispatcher maps kinds to response statuses; bootstrap code uses them to
/// decide whether startup can continue (it never can).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DuplicateRegistration,
    NotFound,
    ValidationFailure,
    AccessDenied,
    AdaptationFailure,
    InjectionFailure,
    LifecycleFailure,
    Internal,
}

/// Phase of the plugin lifecycle a failure happened in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    Register,
    Start,
    Stop,
}

impl core::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            LifecyclePhase::Register => "register",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
        })
    }
}

/// Kernel-level error.
///
/// `kind` strings on the registration variants name the registry that rejected
/// the call (`"service"`, `"plugin"`, `"module"`, `"route"`, ...).
#[derive(Debug, Error)]
pub enum KernelError {
    /// A name was registered twice.
    #[error("{kind} already registered: {name}")]
    DuplicateRegistration { kind: &'static str, name: String },

    /// A lookup by name or handle found nothing.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Bad declaration (module wiring, controller path) or a pipe rejection.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A guard rejected the request.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// No coercion path or a malformed literal.
    #[error(transparent)]
    Adaptation(#[from] AdaptError),

    /// A binding could not be satisfied by the container.
    #[error(transparent)]
    Injection(#[from] InjectError),

    /// A plugin hook failed.
    #[error("plugin `{plugin}` failed to {phase}: {source}")]
    Lifecycle {
        plugin: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },

    /// Anything else (handler failures, panics, transport errors).
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl KernelError {
    pub fn duplicate(kind: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateRegistration {
            kind,
            name: name.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied(reason.into())
    }

    pub fn lifecycle(plugin: impl Into<String>, phase: LifecyclePhase, source: anyhow::Error) -> Self {
        Self::Lifecycle {
            plugin: plugin.into(),
            phase,
            source,
        }
    }

    pub fn internal(msg: impl core::fmt::Display) -> Self {
        Self::Internal(anyhow::anyhow!("{msg}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::DuplicateRegistration { .. } => ErrorKind::DuplicateRegistration,
            KernelError::NotFound { .. } => ErrorKind::NotFound,
            KernelError::Validation(_) => ErrorKind::ValidationFailure,
            KernelError::AccessDenied(_) => ErrorKind::AccessDenied,
            KernelError::Adaptation(_) => ErrorKind::AdaptationFailure,
            KernelError::Injection(_) => ErrorKind::InjectionFailure,
            KernelError::Lifecycle { .. } => ErrorKind::LifecycleFailure,
            KernelError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for failures caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::AccessDenied
                | ErrorKind::ValidationFailure
                | ErrorKind::AdaptationFailure
                | ErrorKind::NotFound
        )
    }
}
