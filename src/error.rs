use crate::domain::money::PaymentMethod;
use crate::domain::payment::{PaymentId, PaymentStatus};
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PaymentError>;

/// Coarse classification of a [`PaymentError`].
///
/// Transport layers map these 1:1 onto protocol status codes without looking
/// at the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    RateLimited,
    ExternalProcessor,
    Internal,
}

#[derive(Error, Diagnostic, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    #[diagnostic(code(payflow::validation))]
    ValidationError(String),

    #[error("Payment {0} not found")]
    #[diagnostic(code(payflow::not_found))]
    NotFound(PaymentId),

    #[error("Cannot {attempted} a payment in status {from}")]
    #[diagnostic(code(payflow::invalid_state_transition))]
    InvalidStateTransition {
        from: PaymentStatus,
        attempted: &'static str,
    },

    #[error("Payment {0} is already being processed")]
    #[diagnostic(
        code(payflow::already_in_progress),
        help("poll the payment status instead of retrying")
    )]
    AlreadyInProgress(PaymentId),

    #[error("No processor registered for payment method {0}")]
    #[diagnostic(code(payflow::unsupported_method))]
    UnsupportedMethod(PaymentMethod),

    #[error("Rate limit exceeded, retry after {}ms", retry_after.as_millis())]
    #[diagnostic(code(payflow::rate_limited))]
    RateLimited { retry_after: Duration },

    #[error("Payment processor error: {0}")]
    #[diagnostic(code(payflow::external_processor))]
    ExternalProcessorError(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(payflow::internal))]
    InternalError(Box<dyn std::error::Error + Send + Sync>),

    #[error("CSV error: {0}")]
    #[diagnostic(code(payflow::csv))]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    #[diagnostic(code(payflow::io))]
    IoError(#[from] std::io::Error),
}

impl PaymentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ValidationError(_) | Self::UnsupportedMethod(_) | Self::CsvError(_) => {
                ErrorKind::Validation
            }
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidStateTransition { .. } | Self::AlreadyInProgress(_) => ErrorKind::Conflict,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ExternalProcessorError(_) => ErrorKind::ExternalProcessor,
            Self::InternalError(_) | Self::IoError(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn internal<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::InternalError(Box::new(err))
    }
}
