use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use fxhash::FxHashMap;
use smallvec::SmallVec;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::critical::Critical;
use crate::generation::Generation;
use crate::notifier::{ChangeNotifier, UpdateCursor};
use crate::{Error, Options, Result, Source, Updates};

pub(crate) type Compute<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Queued write. Receives the value to act on, or the terminal error, and
/// reports whether it changed the value.
pub(crate) type Operation<T> = Box<dyn FnOnce(Result<&mut T, &Error>) -> bool + Send>;

type Awaiters<T> = SmallVec<[oneshot::Sender<Result<T>>; 4]>;

pub(crate) enum SourceState<T> {
	Initial,
	Cached(T),
	Terminal(Option<Error>),
}

struct Running {
	run: u64,
	handle: AbortHandle,
}

enum Readiness {
	Fresh,
	Wait,
}

enum Poll<T> {
	Ready(Result<T>),
	Pending(u64, oneshot::Receiver<Result<T>>),
}

pub(crate) struct FlightInner<T> {
	state: SourceState<T>,
	cursor: UpdateCursor,
	running: Option<Running>,
	awaiters: FxHashMap<u64, oneshot::Sender<Result<T>>>,
	pending: VecDeque<Operation<T>>,
	next_awaiter: u64,
	next_run: u64,
	restarts: usize,
}

impl<T> FlightInner<T> {
	/// Consumes an upstream change. Once the terminal generation has been
	/// seen it no longer counts: the recomputation it caused was the last one.
	fn upstream_changed(&mut self) -> bool {
		let settled = self.cursor.seen().is_terminal();
		self.cursor.check_update() && !settled
	}

	fn register(&mut self) -> (u64, oneshot::Receiver<Result<T>>) {
		let (sender, receiver) = oneshot::channel();
		self.next_awaiter += 1;
		self.awaiters.insert(self.next_awaiter, sender);
		(self.next_awaiter, receiver)
	}

	fn take_awaiters(&mut self) -> Awaiters<T> {
		self.awaiters.drain().map(|(_, sender)| sender).collect()
	}

	fn terminal_error(&self) -> Option<Error> {
		match &self.state {
			SourceState::Terminal(error) => Some(error.clone().unwrap_or(Error::Cancelled)),
			_ => None,
		}
	}
}

/// Single-flight engine behind [`crate::ComputedVariable`] and
/// [`crate::UpdatableVariable`].
///
/// Holds the cached value, the registry of callers waiting for the running
/// computation and the queue of writes deferred until it settles. At most
/// one computation task exists at a time.
pub(crate) struct Flight<T> {
	inner: Critical<FlightInner<T>>,
	compute: Compute<T>,
	upstream: Updates,
	notifier: ChangeNotifier,
	options: Options,
}

impl<T> Flight<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn new(upstream: Updates, compute: Compute<T>, options: Options) -> Arc<Self> {
		Arc::new(Flight {
			inner: Critical::new(FlightInner {
				state: SourceState::Initial,
				cursor: upstream.cursor_from(Generation::ZERO),
				running: None,
				awaiters: FxHashMap::default(),
				pending: VecDeque::new(),
				next_awaiter: 0,
				next_run: 0,
				restarts: 0,
			}),
			compute,
			upstream,
			notifier: ChangeNotifier::new(),
			options,
		})
	}

	pub fn updates(&self) -> Updates {
		Updates::layered(&self.upstream, &self.notifier.updates())
	}

	pub fn is_terminated(&self) -> bool {
		self.inner
			.access(|inner| matches!(inner.state, SourceState::Terminal(_)))
	}

	pub async fn current(self: Arc<Self>) -> Result<T> {
		let (id, receiver) = match self.inner.access(|inner| self.poll(inner)) {
			Poll::Ready(result) => return result,
			Poll::Pending(id, receiver) => (id, receiver),
		};

		let _awaiter = AwaiterGuard { flight: &self, id };
		receiver.await?
	}

	/// Runs `operation` against the cached value right away when it is
	/// fresh and nothing is computing, otherwise queues it behind the
	/// computation. Operations run while the source is locked.
	pub fn apply(self: &Arc<Self>, operation: Operation<T>) {
		let changed = self.inner.access(|inner| {
			if let Some(error) = inner.terminal_error() {
				operation(Err(&error));
				return false;
			}

			if let Readiness::Fresh = self.prepare(inner) {
				if let SourceState::Cached(value) = &mut inner.state {
					return operation(Ok(value));
				}
			}

			inner.pending.push_back(operation);
			false
		});

		if changed {
			self.notifier.send_update();
		}
	}

	fn poll(self: &Arc<Self>, inner: &mut FlightInner<T>) -> Poll<T> {
		if let Some(error) = inner.terminal_error() {
			return Poll::Ready(Err(error));
		}

		if let Readiness::Fresh = self.prepare(inner) {
			if let SourceState::Cached(value) = &inner.state {
				return Poll::Ready(Ok(value.clone()));
			}
		}

		let (id, receiver) = inner.register();
		Poll::Pending(id, receiver)
	}

	/// Makes sure a computation is running whenever the cache can't be used.
	fn prepare(self: &Arc<Self>, inner: &mut FlightInner<T>) -> Readiness {
		let changed = inner.upstream_changed();
		let cached = matches!(inner.state, SourceState::Cached(_));

		if changed || (!cached && inner.running.is_none()) {
			self.restart(inner);
			return Readiness::Wait;
		}

		if cached && inner.running.is_none() {
			Readiness::Fresh
		} else {
			Readiness::Wait
		}
	}

	fn restart(self: &Arc<Self>, inner: &mut FlightInner<T>) {
		if let Some(running) = inner.running.take() {
			tracing::trace!(name = self.options.name, run = running.run, "stale computation aborted");
			running.handle.abort();
		}

		inner.next_run += 1;
		let run = inner.next_run;
		let this = Arc::downgrade(self);

		tracing::trace!(name = self.options.name, run, "computation started");

		let handle = tokio::spawn(async move {
			let future = match this.upgrade() {
				Some(flight) => panic::catch_unwind(AssertUnwindSafe(|| (flight.compute)())),
				None => return,
			};

			let result = match future {
				Ok(future) => AssertUnwindSafe(future)
					.catch_unwind()
					.await
					.unwrap_or_else(|payload| Err(panicked(payload))),
				Err(payload) => Err(panicked(payload)),
			};
			if let Some(flight) = this.upgrade() {
				flight.complete(run, result);
			}
		})
		.abort_handle();

		inner.running = Some(Running { run, handle });
	}

	fn complete(self: &Arc<Self>, run: u64, result: Result<T>) {
		let settled = self.inner.access(|inner| {
			if inner.running.as_ref().map(|running| running.run) != Some(run) {
				return None;
			}
			inner.running = None;

			match result {
				Ok(mut value) => {
					if !inner.pending.is_empty()
						&& inner.restarts < self.options.max_restarts
						&& inner.upstream_changed()
					{
						inner.restarts += 1;
						tracing::trace!(
							name = self.options.name,
							restarts = inner.restarts,
							"upstream moved under queued writes"
						);
						self.restart(inner);
						return None;
					}
					inner.restarts = 0;

					let mut changes = 0;
					for operation in inner.pending.drain(..) {
						if operation(Ok(&mut value)) {
							changes += 1;
						}
					}

					inner.state = SourceState::Cached(value.clone());
					tracing::trace!(name = self.options.name, run, changes, "computation finished");
					Some((Ok(value), inner.take_awaiters(), changes))
				}
				Err(error) => {
					tracing::debug!(name = self.options.name, run, %error, "source terminated");

					for operation in inner.pending.drain(..) {
						operation(Err(&error));
					}

					inner.state = SourceState::Terminal((!error.is_cancelled()).then(|| error.clone()));
					Some((Err(error), inner.take_awaiters(), 0))
				}
			}
		});

		let Some((result, awaiters, changes)) = settled else {
			return;
		};

		if result.is_err() {
			self.notifier.terminate();
		}
		for _ in 0..changes {
			self.notifier.send_update();
		}

		for awaiter in awaiters {
			let _ = awaiter.send(result.clone());
		}
	}
}

impl<T> Source<T> for Flight<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn updates(&self) -> Updates {
		Flight::updates(self)
	}

	fn current(self: Arc<Self>) -> BoxFuture<'static, Result<T>> {
		Box::pin(Flight::current(self))
	}
}

impl<T> Drop for Flight<T> {
	fn drop(&mut self) {
		if let Some(running) = self.inner.access(|inner| inner.running.take()) {
			running.handle.abort();
		}
	}
}

/// A panicking computation fails the source like any other error.
fn panicked(payload: Box<dyn Any + Send>) -> Error {
	let message = payload
		.downcast_ref::<&str>()
		.map(|message| message.to_string())
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| String::from("unknown panic"));

	Error::msg(format!("computation panicked: {message}"))
}

/// Removes a caller's registry entry when it stops waiting, whether it got
/// its result or was dropped mid-wait.
struct AwaiterGuard<'a, T> {
	flight: &'a Flight<T>,
	id: u64,
}

impl<T> Drop for AwaiterGuard<'_, T> {
	fn drop(&mut self) {
		self.flight.inner.access(|inner| {
			inner.awaiters.remove(&self.id);
		});
	}
}
