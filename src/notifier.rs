use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::{FutureExt, Stream};
use tokio::sync::Notify;

use crate::generation::Generation;

struct Signal {
	generation: AtomicU64,
	notify: Notify,
}

impl Signal {
	fn generation(&self) -> Generation {
		Generation::from_raw(self.generation.load(Ordering::Acquire))
	}
}

/// Owner side of a change notification channel.
///
/// Every [`ChangeNotifier::send_update`] moves the generation one step
/// forward and wakes all waiters. [`ChangeNotifier::terminate`] moves it to
/// [`Generation::MAX`] for good.
#[derive(Clone)]
pub struct ChangeNotifier {
	signal: Arc<Signal>,
}

impl Default for ChangeNotifier {
	fn default() -> Self {
		ChangeNotifier::new()
	}
}

impl ChangeNotifier {
	pub fn new() -> Self {
		ChangeNotifier {
			signal: Arc::new(Signal {
				generation: AtomicU64::new(0),
				notify: Notify::new(),
			}),
		}
	}

	pub fn send_update(&self) {
		let stepped = self.signal.generation.fetch_update(
			Ordering::AcqRel,
			Ordering::Acquire,
			|raw| {
				let current = Generation::from_raw(raw);
				(!current.is_terminal()).then(|| current.next().get())
			},
		);

		if stepped.is_ok() {
			self.signal.notify.notify_waiters();
		}
	}

	pub fn terminate(&self) {
		let previous = self.signal.generation.swap(u64::MAX, Ordering::AcqRel);
		if previous != u64::MAX {
			self.signal.notify.notify_waiters();
		}
	}

	pub fn generation(&self) -> Generation {
		self.signal.generation()
	}

	pub fn is_terminated(&self) -> bool {
		self.generation().is_terminal()
	}

	pub fn updates(&self) -> Updates {
		Updates {
			kind: Kind::Signal(self.signal.clone()),
		}
	}
}

/// Observer side of one or more change notifiers.
#[derive(Clone)]
pub struct Updates {
	kind: Kind,
}

#[derive(Clone)]
enum Kind {
	Signal(Arc<Signal>),
	Once,
	Never,
	Combined(Arc<(Updates, Updates)>),
	Layered(Arc<(Updates, Updates)>),
}

impl Updates {
	/// Fires a single time, immediately, and never again.
	pub fn once() -> Self {
		Updates { kind: Kind::Once }
	}

	/// Never fires.
	pub fn never() -> Self {
		Updates { kind: Kind::Never }
	}

	/// Notifier that changes whenever `self` or `other` changes.
	pub fn combined_with(&self, other: &Updates) -> Updates {
		Updates {
			kind: Kind::Combined(Arc::new((self.clone(), other.clone()))),
		}
	}

	/// Notifier of a source that outlives its upstream: it changes with
	/// either side but is terminated only through `own`.
	pub(crate) fn layered(upstream: &Updates, own: &Updates) -> Updates {
		Updates {
			kind: Kind::Layered(Arc::new((upstream.clone(), own.clone()))),
		}
	}

	pub fn generation(&self) -> Generation {
		match &self.kind {
			Kind::Signal(signal) => signal.generation(),
			Kind::Once => Generation::from_raw(1),
			Kind::Never => Generation::ZERO,
			Kind::Combined(pair) => pair.0.generation().combine(pair.1.generation()),
			Kind::Layered(pair) => pair.0.generation().layer(pair.1.generation()),
		}
	}

	pub fn is_terminated(&self) -> bool {
		self.generation().is_terminal()
	}

	/// Compares the current generation with `seen` and moves `seen` forward.
	///
	/// Reports a change once per step of the generation, and on every call
	/// after termination.
	pub fn check_update(&self, seen: &mut Generation) -> bool {
		let current = self.generation();
		if current.is_terminal() {
			*seen = current;
			return true;
		}

		if current != *seen {
			*seen = current;
			true
		} else {
			false
		}
	}

	/// Cursor positioned at the current generation.
	pub fn cursor(&self) -> UpdateCursor {
		self.cursor_from(self.generation())
	}

	pub fn cursor_from(&self, seen: Generation) -> UpdateCursor {
		UpdateCursor {
			updates: self.clone(),
			seen,
		}
	}

	/// Resolves with the current generation as soon as it differs from
	/// `since`. Resolves immediately once terminated.
	pub fn changed(&self, since: Generation) -> BoxFuture<'static, Generation> {
		match &self.kind {
			Kind::Signal(signal) => {
				let signal = signal.clone();
				async move {
					loop {
						// enabled before the load so a concurrent send is never missed
						let notified = signal.notify.notified();
						tokio::pin!(notified);
						notified.as_mut().enable();

						let current = signal.generation();
						if current != since || current.is_terminal() {
							return current;
						}

						notified.await;
					}
				}
				.boxed()
			}
			Kind::Once | Kind::Never => {
				let current = self.generation();
				if current != since {
					future::ready(current).boxed()
				} else {
					future::pending::<Generation>().boxed()
				}
			}
			Kind::Combined(pair) => {
				let pair = pair.clone();
				async move {
					loop {
						let (left, right) = (pair.0.generation(), pair.1.generation());
						let current = left.combine(right);
						if current != since || current.is_terminal() {
							return current;
						}

						future::select(pair.0.changed(left), pair.1.changed(right)).await;
					}
				}
				.boxed()
			}
			Kind::Layered(pair) => {
				let pair = pair.clone();
				async move {
					loop {
						let (upstream, own) = (pair.0.generation(), pair.1.generation());
						let current = upstream.layer(own);
						if current != since || current.is_terminal() {
							return current;
						}

						// a settled upstream resolves at once, only `own` can still move
						if upstream.is_terminal() {
							pair.1.changed(own).await;
						} else {
							future::select(pair.0.changed(upstream), pair.1.changed(own)).await;
						}
					}
				}
				.boxed()
			}
		}
	}

	/// Stream of change pulses observed after subscription.
	///
	/// Bursts may be coalesced into one pulse. A terminated notifier yields a
	/// final [`Generation::MAX`] pulse and the stream ends.
	pub fn stream(&self) -> impl Stream<Item = Generation> + Send + 'static {
		let seen = self.generation();
		futures::stream::unfold(Some((self.clone(), seen)), |state| async move {
			let (updates, seen) = state?;
			let current = updates.changed(seen).await;
			let next = (!current.is_terminal()).then_some((updates, current));
			Some((current, next))
		})
	}
}

impl Debug for Updates {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Updates")
			.field("generation", &self.generation())
			.finish()
	}
}

/// One consumer's view of an [`Updates`] channel.
#[derive(Clone, Debug)]
pub struct UpdateCursor {
	updates: Updates,
	seen: Generation,
}

impl UpdateCursor {
	pub fn check_update(&mut self) -> bool {
		self.updates.check_update(&mut self.seen)
	}

	/// Waits for the next change past the last seen generation.
	pub async fn changed(&mut self) -> Generation {
		let current = self.updates.changed(self.seen).await;
		self.seen = current;
		current
	}

	pub fn seen(&self) -> Generation {
		self.seen
	}

	pub fn updates(&self) -> &Updates {
		&self.updates
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use futures::StreamExt;

	use super::*;

	#[test]
	fn check_update_is_idempotent() {
		let notifier = ChangeNotifier::new();
		let mut cursor = notifier.updates().cursor_from(Generation::ZERO);

		assert!(!cursor.check_update());

		notifier.send_update();
		assert!(cursor.check_update());
		assert!(!cursor.check_update());
	}

	#[test]
	fn terminated_always_reports_changed() {
		let notifier = ChangeNotifier::new();
		let mut cursor = notifier.updates().cursor();

		notifier.terminate();
		notifier.send_update();

		assert!(cursor.check_update());
		assert!(cursor.check_update());
		assert_eq!(notifier.generation(), Generation::MAX);
	}

	#[test]
	fn static_notifiers() {
		let mut once = Updates::once().cursor_from(Generation::ZERO);
		assert!(once.check_update());
		assert!(!once.check_update());

		let mut never = Updates::never().cursor_from(Generation::ZERO);
		assert!(!never.check_update());
	}

	#[test]
	fn combined_follows_either_side() {
		let left = ChangeNotifier::new();
		let right = ChangeNotifier::new();
		let mut cursor = left.updates().combined_with(&right.updates()).cursor();

		assert!(!cursor.check_update());

		left.send_update();
		assert!(cursor.check_update());

		right.send_update();
		assert!(cursor.check_update());
		assert!(!cursor.check_update());

		right.terminate();
		assert!(cursor.check_update());
		assert!(cursor.check_update());
	}

	#[test]
	fn layered_outlives_its_upstream() {
		let upstream = ChangeNotifier::new();
		let own = ChangeNotifier::new();
		let mut cursor = Updates::layered(&upstream.updates(), &own.updates()).cursor();

		upstream.terminate();
		assert!(cursor.check_update());
		assert!(!cursor.check_update());
		assert!(!cursor.updates().is_terminated());

		own.send_update();
		assert!(cursor.check_update());
		assert!(!cursor.check_update());

		own.terminate();
		assert!(cursor.updates().is_terminated());
	}

	#[test]
	fn concurrent_updates_are_not_lost() {
		let notifier = ChangeNotifier::new();

		std::thread::scope(|scope| {
			for _ in 0..4 {
				scope.spawn(|| {
					for _ in 0..1000 {
						notifier.send_update();
					}
				});
			}
		});

		assert_eq!(notifier.generation().get(), 4000);
	}

	#[tokio::test]
	async fn changed_wakes_waiters() {
		let notifier = ChangeNotifier::new();
		let mut cursor = notifier.updates().cursor();

		let waiter = tokio::spawn(async move { cursor.changed().await });

		tokio::time::sleep(Duration::from_millis(10)).await;
		notifier.send_update();

		let generation = waiter.await.unwrap();
		assert_eq!(generation.get(), 1);
	}

	#[tokio::test]
	async fn combined_wakes_on_either_side() {
		let left = ChangeNotifier::new();
		let right = ChangeNotifier::new();
		let mut cursor = left.updates().combined_with(&right.updates()).cursor();

		let waiter = tokio::spawn(async move { cursor.changed().await });

		tokio::time::sleep(Duration::from_millis(10)).await;
		right.send_update();

		assert_eq!(waiter.await.unwrap().get(), 1);
	}

	#[tokio::test]
	async fn layered_waits_on_own_after_upstream_settled() {
		let upstream = ChangeNotifier::new();
		let own = ChangeNotifier::new();
		upstream.terminate();

		let mut cursor = Updates::layered(&upstream.updates(), &own.updates()).cursor();
		let waiter = tokio::spawn(async move { cursor.changed().await });

		tokio::time::sleep(Duration::from_millis(10)).await;
		assert!(!waiter.is_finished());

		own.send_update();
		assert!(!waiter.await.unwrap().is_terminal());
	}

	#[tokio::test]
	async fn stream_ends_after_termination() {
		let notifier = ChangeNotifier::new();
		let mut stream = Box::pin(notifier.updates().stream());

		notifier.send_update();
		assert_eq!(stream.next().await, Some(Generation::from_raw(1)));

		notifier.terminate();
		assert_eq!(stream.next().await, Some(Generation::MAX));
		assert_eq!(stream.next().await, None);
	}
}
