//! Observable values that are recomputed lazily and updated single-flight.
//!
//! - [`Variable`] holds a value that is read and written synchronously.
//! - [`ComputedVariable`] computes its value on demand and recomputes it
//!   only after its [`Updates`] change. Concurrent readers share one
//!   computation.
//! - [`UpdatableVariable`] is a computed value that also accepts writes.
//! - [`view`] projects these onto single-threaded presentation state.
//!
//! Lazy sources spawn their computations on the ambient tokio runtime.

mod computed;
mod critical;
mod error;
mod flight;
mod generation;
mod notifier;
mod options;
mod source;
mod updatable;
mod variable;

pub mod view;

use std::sync::Arc;

pub use computed::ComputedVariable;
pub use critical::Critical;
pub use error::{Error, Result};
pub use futures::future::BoxFuture;
pub use generation::Generation;
pub use notifier::{ChangeNotifier, UpdateCursor, Updates};
pub use options::Options;
pub use source::{AnySource, WeakSource};
pub use updatable::UpdatableVariable;
pub use variable::{Field, Toggle, Variable};

pub trait Source<T>: Send + Sync + 'static {
	/// Changes whenever `current` may produce something new.
	fn updates(&self) -> Updates;

	/// The up-to-date value. Fails for good once the source is terminal.
	fn current(self: Arc<Self>) -> BoxFuture<'static, Result<T>>;
}
