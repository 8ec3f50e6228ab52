use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;

use crate::flight::Flight;
use crate::{AnySource, Error, Options, Result, Updates};

/// Read-only value computed on demand.
///
/// The value is computed the first time it is asked for and cached. It is
/// computed again only after `updates` reports a change, and callers
/// arriving while a computation runs share its outcome. A failed
/// computation turns the source terminal: every later read returns the
/// same error.
pub struct ComputedVariable<T> {
	flight: Arc<Flight<T>>,
}

impl<T> Clone for ComputedVariable<T> {
	fn clone(&self) -> Self {
		Self {
			flight: self.flight.clone(),
		}
	}
}

impl<T> ComputedVariable<T>
where
	T: Clone + Send + Sync + 'static,
{
	/// Recomputes with `compute` after every change of `updates`.
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
		ComputedVariable {
			flight: Flight::new(updates, Box::new(move || compute().boxed()), options),
		}
	}

	/// Computes once, lazily, and keeps the value forever.
	pub fn once<F, Fut>(compute: F) -> Self
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T>> + Send + 'static,
	{
		Self::new(Updates::once(), compute)
	}

	/// Derives the value from `upstream`.
	///
	/// The upstream is held weakly; once it is gone the next recomputation
	/// fails with [`Error::Cancelled`].
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

	/// Derives the value from two upstreams read concurrently.
	///
	/// When one side changes much more often than the other, a result may
	/// briefly pair a fresh value with a stale one. The next change of
	/// either side recomputes and heals it.
	pub fn combine<A, B>(
		left: impl Into<AnySource<A>>,
		right: impl Into<AnySource<B>>,
		transform: impl Fn(A, B) -> Result<T> + Send + Sync + 'static,
	) -> Self
	where
		A: Send + 'static,
		B: Send + 'static,
	{
		let (left, right) = (left.into(), right.into());
		let updates = left.updates().combined_with(&right.updates());
		let (left, right) = (left.downgrade(), right.downgrade());
		let transform = Arc::new(transform);

		Self::new(updates, move || {
			let sources = left.upgrade().zip(right.upgrade());
			let transform = transform.clone();
			async move {
				let (left, right) = sources.ok_or(Error::Cancelled)?;
				let (a, b) = futures::future::try_join(left.current(), right.current()).await?;
				transform(a, b)
			}
		})
	}

	pub async fn current(&self) -> Result<T> {
		self.flight.clone().current().await
	}

	pub fn updates(&self) -> Updates {
		self.flight.updates()
	}

	pub fn is_terminated(&self) -> bool {
		self.flight.is_terminated()
	}
}

impl<T> From<ComputedVariable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(computed: ComputedVariable<T>) -> Self {
		AnySource::new(computed.flight)
	}
}

impl<T> From<&ComputedVariable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(computed: &ComputedVariable<T>) -> Self {
		AnySource::new(computed.flight.clone())
	}
}

impl<T> Debug for ComputedVariable<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComputedVariable").finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;
	use crate::{ChangeNotifier, Variable};

	fn counted(calls: &Arc<AtomicUsize>, value: u64) -> ComputedVariable<u64> {
		let calls = calls.clone();
		ComputedVariable::once(move || {
			calls.fetch_add(1, Ordering::SeqCst);
			async move {
				tokio::time::sleep(Duration::from_millis(20)).await;
				Ok(value)
			}
		})
	}

	fn explode() -> u64 {
		panic!("sensor unplugged")
	}

	#[tokio::test]
	async fn panicking_computation_fails_readers() {
		let computed = ComputedVariable::once(|| async { Ok(explode()) });

		let (a, b) = tokio::join!(computed.current(), computed.current());

		let error = a.unwrap_err();
		assert_eq!(error.to_string(), "computation panicked: sensor unplugged");
		assert!(error.same_failure(&b.unwrap_err()));
		assert!(computed.is_terminated());
	}

	#[tokio::test]
	async fn concurrent_reads_share_one_computation() {
		let calls = Arc::new(AtomicUsize::new(0));
		let computed = counted(&calls, 42);

		let (a, b) = tokio::join!(computed.current(), computed.current());

		assert_eq!(a.unwrap(), 42);
		assert_eq!(b.unwrap(), 42);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn fresh_cache_is_served_without_computing() {
		let calls = Arc::new(AtomicUsize::new(0));
		let computed = counted(&calls, 7);

		assert_eq!(computed.current().await.unwrap(), 7);

		let reads = (0..16).map(|_| computed.current());
		for read in futures::future::join_all(reads).await {
			assert_eq!(read.unwrap(), 7);
		}
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn recomputes_after_update() {
		let notifier = ChangeNotifier::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let computed = ComputedVariable::new(notifier.updates(), {
			let calls = calls.clone();
			move || {
				let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
				async move { Ok(call) }
			}
		});

		assert_eq!(computed.current().await.unwrap(), 1);
		assert_eq!(computed.current().await.unwrap(), 1);

		notifier.send_update();
		assert_eq!(computed.current().await.unwrap(), 2);
	}

	#[tokio::test]
	async fn stale_computation_is_replaced() {
		let notifier = ChangeNotifier::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let computed = ComputedVariable::new(notifier.updates(), {
			let calls = calls.clone();
			move || {
				let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
				async move {
					tokio::time::sleep(Duration::from_millis(30)).await;
					Ok(call)
				}
			}
		});

		assert_eq!(computed.current().await.unwrap(), 1);

		notifier.send_update();
		let first = tokio::spawn({
			let computed = computed.clone();
			async move { computed.current().await }
		});
		tokio::time::sleep(Duration::from_millis(5)).await;

		notifier.send_update();
		let second = computed.current().await.unwrap();

		// the first waiter was moved onto the fresh computation
		assert_eq!(first.await.unwrap().unwrap(), second);
		assert_eq!(second, 3);
	}

	#[tokio::test]
	async fn failure_is_terminal() {
		let calls = Arc::new(AtomicUsize::new(0));
		let computed: ComputedVariable<u64> = ComputedVariable::once({
			let calls = calls.clone();
			move || {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Err(Error::msg("offline")) }
			}
		});

		let first = computed.current().await.unwrap_err();
		let second = computed.current().await.unwrap_err();

		assert_eq!(first.to_string(), "offline");
		assert!(first.same_failure(&second));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(computed.is_terminated());
		assert!(computed.updates().is_terminated());
	}

	#[tokio::test]
	async fn cancelled_reader_leaves_computation_running() {
		let calls = Arc::new(AtomicUsize::new(0));
		let computed = counted(&calls, 5);

		let cancelled = tokio::time::timeout(Duration::from_millis(5), computed.current()).await;
		assert!(cancelled.is_err());

		assert_eq!(computed.current().await.unwrap(), 5);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn map_follows_upstream() {
		let variable = Variable::new(2u64);
		let doubled = ComputedVariable::map(&variable, |value: u64| Ok(value * 2));

		assert_eq!(doubled.current().await.unwrap(), 4);

		variable.set(5);
		assert_eq!(doubled.current().await.unwrap(), 10);
	}

	#[tokio::test]
	async fn map_propagates_terminal_failure() {
		let upstream: ComputedVariable<u64> =
			ComputedVariable::once(|| async { Err(Error::msg("gone")) });
		let mapped = ComputedVariable::map(&upstream, |value: u64| Ok(value + 1));

		let error = mapped.current().await.unwrap_err();
		assert_eq!(error.to_string(), "gone");
		assert!(mapped.is_terminated());
	}

	#[tokio::test]
	async fn dropped_upstream_cancels() {
		let variable = Variable::new(1u64);
		let mapped = ComputedVariable::map(&variable, |value: u64| Ok(value));
		drop(variable);

		assert!(mapped.current().await.unwrap_err().is_cancelled());
		assert!(mapped.is_terminated());
	}

	#[tokio::test]
	async fn combine_reads_both_sides() {
		let left = Variable::new(1u64);
		let right = Variable::new(String::from("a"));
		let combined = ComputedVariable::combine(&left, &right, |n: u64, s: String| Ok(format!("{s}{n}")));

		assert_eq!(combined.current().await.unwrap(), "a1");

		right.set(String::from("b"));
		assert_eq!(combined.current().await.unwrap(), "b1");

		left.set(2);
		assert_eq!(combined.current().await.unwrap(), "b2");
	}
}
