use outreach_core::error::OutreachError;
use outreach_core::lifecycle::CancelRejection;
use outreach_core::types::{EmailId, UserId};
use thiserror::Error;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Sender address {0} is not confirmed for this send method")]
    NotConfirmed(String),

    #[error("Email {0} has already been sent")]
    AlreadySent(EmailId),

    #[error("Email {id} has invalid content: {reason}")]
    InvalidContent { id: EmailId, reason: String },

    #[error("Email {0} has already been delivered")]
    AlreadyDelivered(EmailId),

    #[error("Email {0} is not scheduled for a future send")]
    NotScheduled(EmailId),

    #[error("Email {0} not found")]
    NotFound(EmailId),

    #[error("Email {0} does not belong to the caller")]
    Forbidden(EmailId),

    #[error("User {0} is not allowed to send")]
    SenderSuspended(UserId),

    #[error(transparent)]
    Infrastructure(#[from] OutreachError),
}

/// Coarse classification used by the HTTP layer and batch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Forbidden,
    Infrastructure,
}

impl DeliveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeliveryError::NotConfirmed(_) | DeliveryError::InvalidContent { .. } => {
                ErrorKind::Validation
            }
            DeliveryError::AlreadySent(_)
            | DeliveryError::AlreadyDelivered(_)
            | DeliveryError::NotScheduled(_) => ErrorKind::Conflict,
            DeliveryError::NotFound(_) => ErrorKind::NotFound,
            DeliveryError::Forbidden(_) | DeliveryError::SenderSuspended(_) => ErrorKind::Forbidden,
            DeliveryError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }
}

impl From<CancelRejection> for DeliveryError {
    fn from(rejection: CancelRejection) -> Self {
        match rejection {
            CancelRejection::AlreadyDelivered(id) => DeliveryError::AlreadyDelivered(id),
            CancelRejection::NotScheduled(id) => DeliveryError::NotScheduled(id),
        }
    }
}
