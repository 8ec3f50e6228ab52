use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;

use crate::flight::{Flight, Operation};
use crate::{AnySource, Error, Options, Result, Updates};

/// Lazily computed value that can also be written.
///
/// Reads follow the same rules as [`crate::ComputedVariable`]. Writes made
/// while the cached value is stale or being recomputed are queued and
/// applied, in order, to the freshly computed value.
pub struct UpdatableVariable<T> {
	flight: Arc<Flight<T>>,
}

impl<T> Clone for UpdatableVariable<T> {
	fn clone(&self) -> Self {
		Self {
			flight: self.flight.clone(),
		}
	}
}

impl<T> UpdatableVariable<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn new<F, Fut>(updates: Updates, compute: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		Self::with_options(updates, compute, Options::default())
	}

	pub fn with_options<F, Fut>(updates: Updates, compute: F, options: Options) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		UpdatableVariable {
			flight: Flight::new(updates, Box::new(move || compute().boxed()), options),
		}
	}

	/// Seeds the value once from `compute`; afterwards it only changes
	/// through writes.
	pub fn once<F, Fut>(compute: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		Self::new(Updates::once(), compute)
	}

	/// Starts from a known value.
	pub fn with_value(value: T) -> Self {
		Self::once(move || futures::future::ready(Ok(value.clone())))
	}

	/// Reseeds from `upstream` whenever it changes. Local writes survive
	/// until the next upstream change.
	pub fn map<U>(
		upstream: impl Into<AnySource<U>>,
		transform: impl Fn(U) -> Result<T> + Send + Sync + 'static,
	) -> Self
	where
		U: 'static,
	{
		let upstream = upstream.into();
		let updates = upstream.updates();
		let upstream = upstream.downgrade();
		let transform = Arc::new(transform);

		Self::new(updates, move || {
			let upstream = upstream.upgrade();
			let transform = transform.clone();
			async move {
				let upstream = upstream.ok_or(Error::Cancelled)?;
				transform(upstream.current().await?)
			}
		})
	}

	pub async fn value(&self) -> Result<T> {
		self.flight.clone().current().await
	}

	/// Changes the value in place without waiting.
	///
	/// Applied immediately when the cached value is fresh, otherwise after
	/// the pending computation. Ignored once the source is terminal. The
	/// closure may run while the source is locked and must not touch it.
	pub fn mutate(&self, body: impl FnOnce(&mut T) + Send + 'static) {
		let operation: Operation<T> = Box::new(move |value: Result<&mut T, &Error>| match value {
			Ok(value) => {
				body(value);
				true
			}
			Err(_) => false,
		});
		self.flight.apply(operation);
	}

	/// Changes the value and waits for the outcome.
	///
	/// `body` runs on a copy of the value that replaces it only when `body`
	/// succeeds. A terminal source fails with its error. Dropping the
	/// returned future before the write happened withdraws it.
	pub async fn update<R>(
		&self,
		body: impl FnOnce(&mut T) -> Result<R> + Send + 'static,
	) -> Result<R>
	where
		R: Send + 'static,
	{
		let (sender, receiver) = oneshot::channel();
		let operation: Operation<T> = Box::new(move |value: Result<&mut T, &Error>| match value {
			Ok(_) if sender.is_closed() => false,
			Ok(value) => {
				let mut draft = value.clone();
				match body(&mut draft) {
					Ok(returned) => {
						*value = draft;
						let _ = sender.send(Ok(returned));
						true
					}
					Err(error) => {
						let _ = sender.send(Err(error));
						false
					}
				}
			}
			Err(error) => {
				let _ = sender.send(Err(error.clone()));
				false
			}
		});

		self.flight.apply(operation);
		receiver.await?
	}

	pub fn updates(&self) -> Updates {
		self.flight.updates()
	}

	pub fn is_terminated(&self) -> bool {
		self.flight.is_terminated()
	}
}

impl<T> From<UpdatableVariable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(variable: UpdatableVariable<T>) -> Self {
		AnySource::new(variable.flight)
	}
}

impl<T> From<&UpdatableVariable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(variable: &UpdatableVariable<T>) -> Self {
		AnySource::new(variable.flight.clone())
	}
}

impl<T> Debug for UpdatableVariable<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("UpdatableVariable").finish_non_exhaustive()
	}
}
