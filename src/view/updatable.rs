use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::{Rc, Weak};

use futures::future::{LocalBoxFuture, Shared};
use enclose::enclose;
use futures::FutureExt;
use tokio::task::AbortHandle;

use crate::notifier::UpdateCursor;
use crate::view::{AnyViewStateSource, Binding, ViewStateSource, ViewStateVariable};
use crate::{Error, Result, Updates};

type Update<S> = Box<dyn Fn(S) -> LocalBoxFuture<'static, Result<S>>>;

/// Binding write made while an update was running, replayed on its result.
type Write<S> = Box<dyn FnOnce(&mut S)>;

struct Running {
	shared: Shared<LocalBoxFuture<'static, Result<()>>>,
	handle: AbortHandle,
}

struct UpdatableBody<S> {
	state: ViewStateVariable<S>,
	update: Update<S>,
	trigger: RefCell<UpdateCursor>,
	loaded: Cell<bool>,
	running: RefCell<Option<Running>>,
	writes: RefCell<Vec<Write<S>>>,
}

impl<S> Drop for UpdatableBody<S> {
	fn drop(&mut self) {
		if let Some(running) = self.running.get_mut().take() {
			running.handle.abort();
		}
	}
}

/// View state refreshed by an asynchronous update.
///
/// `update` feeds the current state to the update function and publishes
/// what it returns. Calls made while an update is running wait for that
/// update instead of starting another one. Binding writes made while an
/// update runs are applied to its result, so they are never lost.
pub struct UpdatableViewState<S> {
	body: Rc<UpdatableBody<S>>,
}

impl<S> Clone for UpdatableViewState<S> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<S> UpdatableViewState<S>
where
	S: Clone + PartialEq + 'static,
{
	/// `trigger` marks the state as outdated for
	/// [`UpdatableViewState::update_if_needed`].
	pub fn new<F, Fut>(initial: S, trigger: Updates, update: F) -> Self
	where
		F: Fn(S) -> Fut + 'static,
		Fut: Future<Output = Result<S>> + 'static,
	{
		UpdatableViewState {
			body: Rc::new(UpdatableBody {
				state: ViewStateVariable::new(initial),
				update: Box::new(move |state| update(state).boxed_local()),
				trigger: RefCell::new(trigger.cursor()),
				loaded: Cell::new(false),
				running: RefCell::new(None),
				writes: RefCell::new(Vec::new()),
			}),
		}
	}

	/// Runs the update, or joins the one already running.
	pub async fn update(&self) -> Result<()> {
		match self.running() {
			Some(shared) => shared.await,
			None => self.start().await,
		}
	}

	/// Updates only when the state was never loaded or the trigger fired
	/// since the last check. A running update is joined, unless the trigger
	/// fired after it started: then a fresh update follows it.
	pub async fn update_if_needed(&self) -> Result<()> {
		let outdated = self.body.trigger.borrow_mut().check_update();

		match self.running() {
			Some(shared) if outdated => {
				let _ = shared.await;
				self.update().await
			}
			Some(shared) => shared.await,
			None if outdated || !self.body.loaded.get() => self.start().await,
			None => Ok(()),
		}
	}

	pub fn is_updating(&self) -> bool {
		self.body.running.borrow().is_some()
	}

	fn running(&self) -> Option<Shared<LocalBoxFuture<'static, Result<()>>>> {
		self.body
			.running
			.borrow()
			.as_ref()
			.map(|running| running.shared.clone())
	}

	fn start(&self) -> Shared<LocalBoxFuture<'static, Result<()>>> {
		let future = (self.body.update)(self.body.state.state());
		let body = Rc::downgrade(&self.body);

		let task = tokio::task::spawn_local(async move {
			let result = future.await;
			let Some(body) = Weak::upgrade(&body) else {
				return Err(Error::Cancelled);
			};
			body.running.borrow_mut().take();

			match result {
				Ok(mut state) => {
					for write in body.writes.take() {
						write(&mut state);
					}
					body.loaded.set(true);
					body.state.set(state);
					Ok(())
				}
				Err(error) => {
					body.writes.borrow_mut().clear();
					tracing::warn!(%error, "view state update failed");
					Err(error)
				}
			}
		});

		let handle = task.abort_handle();
		let shared = task
			.map(|joined| joined.unwrap_or(Err(Error::Cancelled)))
			.boxed_local()
			.shared();

		*self.body.running.borrow_mut() = Some(Running {
			shared: shared.clone(),
			handle,
		});
		shared
	}

	pub fn state(&self) -> S {
		self.body.state.state()
	}

	pub fn binding<V: Clone + 'static>(
		&self,
		getter: impl Fn(&S) -> V + 'static,
		setter: impl Fn(&mut S, V) + 'static,
	) -> Binding<V> {
		let body = self.body.clone();
		let setter = Rc::new(setter);

		Binding::new(
			enclose!((body) move || { body.state.with(&getter) }),
			move |value: V| {
				if body.running.borrow().is_some() {
					let (setter, replayed) = (setter.clone(), value.clone());
					body.writes
						.borrow_mut()
						.push(Box::new(move |state: &mut S| setter(state, replayed)));
				}
				body.state.mutate(|state| setter(state, value));
			},
		)
	}

	pub fn updates(&self) -> Updates {
		self.body.state.updates()
	}

	pub fn force_update(&self) {
		self.body.state.force_update()
	}
}

impl<S> ViewStateSource<S> for UpdatableViewState<S>
where
	S: Clone + PartialEq + 'static,
{
	fn state(&self) -> S {
		UpdatableViewState::state(self)
	}

	fn updates(&self) -> Updates {
		UpdatableViewState::updates(self)
	}

	fn force_update(&self) {
		UpdatableViewState::force_update(self)
	}
}

impl<S> From<UpdatableViewState<S>> for AnyViewStateSource<S>
where
	S: Clone + PartialEq + 'static,
{
	fn from(updatable: UpdatableViewState<S>) -> Self {
		AnyViewStateSource::new(updatable)
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use tokio::task::LocalSet;

	use super::*;
	use crate::ChangeNotifier;

	fn counter(calls: &Rc<Cell<u32>>, trigger: Updates) -> UpdatableViewState<u32> {
		let calls = calls.clone();
		UpdatableViewState::new(0, trigger, move |state| {
			calls.set(calls.get() + 1);
			async move {
				tokio::time::sleep(Duration::from_millis(10)).await;
				Ok(state + 1)
			}
		})
	}

	#[tokio::test]
	async fn concurrent_updates_share_one_run() {
		LocalSet::new()
			.run_until(async {
				let calls = Rc::new(Cell::new(0));
				let view = counter(&calls, Updates::never());

				let (a, b) = tokio::join!(view.update(), view.update());

				assert!(a.is_ok() && b.is_ok());
				assert_eq!(calls.get(), 1);
				assert_eq!(view.state(), 1);
				assert!(!view.is_updating());
			})
			.await;
	}

	#[tokio::test]
	async fn update_if_needed_follows_trigger() {
		LocalSet::new()
			.run_until(async {
				let calls = Rc::new(Cell::new(0));
				let trigger = ChangeNotifier::new();
				let view = counter(&calls, trigger.updates());

				view.update_if_needed().await.unwrap();
				view.update_if_needed().await.unwrap();
				assert_eq!(calls.get(), 1);

				trigger.send_update();
				view.update_if_needed().await.unwrap();
				assert_eq!(calls.get(), 2);
				assert_eq!(view.state(), 2);
			})
			.await;
	}

	#[tokio::test]
	async fn trigger_during_update_starts_another() {
		LocalSet::new()
			.run_until(async {
				let calls = Rc::new(Cell::new(0));
				let trigger = ChangeNotifier::new();
				let view = counter(&calls, trigger.updates());

				let (first, second) = tokio::join!(view.update(), async {
					trigger.send_update();
					view.update_if_needed().await
				});

				assert!(first.is_ok() && second.is_ok());
				assert_eq!(calls.get(), 2);
				assert_eq!(view.state(), 2);
			})
			.await;
	}

	#[tokio::test]
	async fn failed_update_keeps_state() {
		LocalSet::new()
			.run_until(async {
				let view = UpdatableViewState::new(String::from("cached"), Updates::never(), |_| async {
					Err(Error::msg("unreachable host"))
				});

				let error = view.update().await.unwrap_err();

				assert_eq!(error.to_string(), "unreachable host");
				assert_eq!(view.state(), "cached");
				assert!(!view.is_updating());
			})
			.await;
	}

	#[tokio::test]
	async fn binding_writes_publish() {
		LocalSet::new()
			.run_until(async {
				let view = UpdatableViewState::new((String::from("draft"), 0u8), Updates::never(), |state| async move {
					Ok(state)
				});
				let title = view.binding(|s| s.0.clone(), |s, title| s.0 = title);
				let mut cursor = view.updates().cursor();

				title.set(String::from("final"));

				assert!(cursor.check_update());
				assert_eq!(view.state().0, "final");
			})
			.await;
	}

	#[tokio::test]
	async fn binding_writes_survive_running_update() {
		LocalSet::new()
			.run_until(async {
				let view = UpdatableViewState::new(
					(String::from("draft"), 0u8),
					Updates::never(),
					|state: (String, u8)| async move {
						tokio::time::sleep(Duration::from_millis(20)).await;
						Ok((state.0, state.1 + 1))
					},
				);
				let title = view.binding(|s| s.0.clone(), |s, title| s.0 = title);

				let (updated, _) = tokio::join!(view.update(), async {
					tokio::time::sleep(Duration::from_millis(5)).await;
					title.set(String::from("typed by user"));
					assert_eq!(view.state().0, "typed by user");
				});

				updated.unwrap();
				assert_eq!(view.state(), (String::from("typed by user"), 1));
			})
			.await;
	}
}
