use std::fmt::Debug;

use tokio::task::JoinHandle;

use crate::view::{AnyViewStateSource, ViewStateSource, ViewStateVariable};
use crate::{AnySource, Error, Result, Updates};

/// View state that follows a data-layer source.
///
/// Every change of the upstream is read and turned into state with
/// `transform`. Failures never reach the view: a failed read or transform
/// publishes `fallback(error)` instead. Following stops once the upstream
/// is terminal or this value is dropped.
pub struct ComputedViewState<S> {
	state: ViewStateVariable<S>,
	task: JoinHandle<()>,
}

impl<S> ComputedViewState<S>
where
	S: Clone + PartialEq + 'static,
{
	pub fn new<U>(
		upstream: impl Into<AnySource<U>>,
		initial: S,
		transform: impl Fn(U) -> Result<S> + 'static,
		fallback: impl Fn(&Error) -> S + 'static,
	) -> Self
	where
		U: 'static,
	{
		let upstream = upstream.into();
		let state = ViewStateVariable::new(initial);
		let target = state.downgrade();

		let task = tokio::task::spawn_local(async move {
			let mut cursor = upstream.updates().cursor();

			loop {
				let next = match upstream.current().await.and_then(&transform) {
					Ok(next) => next,
					Err(error) => {
						tracing::warn!(%error, "view state fell back");
						fallback(&error)
					}
				};

				let Some(state) = ViewStateVariable::upgrade(&target) else {
					break;
				};
				state.set(next);
				drop(state);

				if cursor.seen().is_terminal() {
					break;
				}
				cursor.changed().await;
			}
		});

		ComputedViewState { state, task }
	}

	pub fn state(&self) -> S {
		self.state.state()
	}

	pub fn updates(&self) -> Updates {
		self.state.updates()
	}

	pub fn force_update(&self) {
		self.state.force_update()
	}
}

impl<S> ViewStateSource<S> for ComputedViewState<S>
where
	S: Clone + PartialEq + 'static,
{
	fn state(&self) -> S {
		ComputedViewState::state(self)
	}

	fn updates(&self) -> Updates {
		ComputedViewState::updates(self)
	}

	fn force_update(&self) {
		ComputedViewState::force_update(self)
	}
}

impl<S> From<ComputedViewState<S>> for AnyViewStateSource<S>
where
	S: Clone + PartialEq + 'static,
{
	fn from(computed: ComputedViewState<S>) -> Self {
		AnyViewStateSource::new(computed)
	}
}

impl<S> Drop for ComputedViewState<S> {
	fn drop(&mut self) {
		self.task.abort();
	}
}

impl<S: Debug> Debug for ComputedViewState<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComputedViewState")
			.field("state", &self.state)
			.finish()
	}
}
