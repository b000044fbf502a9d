use std::sync::Arc;

/// Terminal error signal carried by a stream.
///
/// Errors are cloneable because a multicast source duplicates a terminal
/// error to every attached consumer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// A consumer issued `request(0)`; demand increments must be positive.
    #[error("request amount must be positive, got {0}")]
    BadRequest(u64),
    /// The upstream out-ran the handoff queue it was told to respect.
    #[error("handoff queue overflow: upstream ignored the prefetch bound")]
    Overflow,
    /// A consumer callback panicked; the subscription is unrecoverable.
    #[error("consumer callback panicked: {0}")]
    CallbackPanic(Arc<str>),
    /// Failure reported by a source.
    #[error("source failure: {0}")]
    Source(Arc<str>),
}

impl StreamError {
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source(Arc::from(message.into()))
    }

    pub fn callback_panic(message: impl Into<String>) -> Self {
        Self::CallbackPanic(Arc::from(message.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_messages() {
        assert_eq!(
            StreamError::BadRequest(0).to_string(),
            "request amount must be positive, got 0"
        );
        assert_eq!(
            StreamError::source("broken").to_string(),
            "source failure: broken"
        );
    }

    #[test]
    fn errors_are_cloneable_and_comparable() {
        let error = StreamError::callback_panic("boom");
        assert_eq!(error.clone(), error);
    }
}
