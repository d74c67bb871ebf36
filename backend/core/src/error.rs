use thiserror::Error;

/// Error taxonomy of the presence watchdog.
///
/// None of these is fatal: the watchdog logs them, publishes an advisory
/// event where useful, and keeps processing.
#[derive(Debug, Error)]
pub enum WardenError {
    #[error("admission rejected: capacity of {capacity} watched users reached")]
    AdmissionRejected { capacity: usize },

    #[error("challenge delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("escalation failed: {0}")]
    EscalationFailure(String),

    #[error("progression store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    /// Wrap a store-layer failure, keeping the full context chain.
    pub fn store(err: &anyhow::Error) -> Self {
        Self::StoreUnavailable(format!("{err:#}"))
    }

    pub fn delivery(err: &anyhow::Error) -> Self {
        Self::DeliveryFailure(format!("{err:#}"))
    }

    pub fn escalation(err: &anyhow::Error) -> Self {
        Self::EscalationFailure(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn admission_message_names_capacity() {
        let err = WardenError::AdmissionRejected { capacity: 500 };
        assert_eq!(
            err.to_string(),
            "admission rejected: capacity of 500 watched users reached"
        );
    }

    #[test]
    fn store_error_keeps_context_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("disk I/O error"));
        let err = inner.context("add xp").unwrap_err();
        let wrapped = WardenError::store(&err);
        assert_eq!(
            wrapped.to_string(),
            "progression store unavailable: add xp: disk I/O error"
        );
    }
}
