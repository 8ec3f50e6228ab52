use std::sync::Arc;

/// Failure of a lazily computed source.
///
/// `Cancelled` is routine churn: a caller stopped waiting, a weakly held
/// upstream went away, or a source was terminated without a recorded
/// error. Everything else is `Failed`, which is permanent for the source
/// that produced it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
	#[error("cancelled")]
	Cancelled,
	#[error("{0}")]
	Failed(Arc<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
	pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
		Error::Failed(Arc::from(error.into()))
	}

	pub fn msg(message: impl Into<String>) -> Self {
		Error::failed(message.into())
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Error::Cancelled)
	}

	/// Two errors are the same failure when they share the allocation.
	pub fn same_failure(&self, other: &Error) -> bool {
		match (self, other) {
			(Error::Cancelled, Error::Cancelled) => true,
			(Error::Failed(a), Error::Failed(b)) => Arc::ptr_eq(a, b),
			_ => false,
		}
	}
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
	fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
		Error::Cancelled
	}
}
