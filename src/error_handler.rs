use crate::Error;

/// Sink for errors raised inside the evaluation client.
///
/// The client never returns these errors to its caller; it reports them here and returns a
/// fallback value instead.
pub trait ErrorHandler: Send + Sync {
    /// This method should not panic.
    fn handle_error(&self, error: &Error);
}

/// Logs and swallows every error.
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle_error(&self, error: &Error) {
        log::error!(target: "abserve", "caught evaluation client error: {error}");
    }
}

pub(crate) struct NoopErrorHandler;

impl ErrorHandler for NoopErrorHandler {
    fn handle_error(&self, _error: &Error) {}
}

impl<T: Fn(&Error) + Send + Sync> ErrorHandler for T {
    fn handle_error(&self, error: &Error) {
        self(error);
    }
}
