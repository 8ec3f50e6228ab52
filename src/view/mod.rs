//! Presentation-side state.
//!
//! Everything here is `!Send` and is meant to live on the single UI thread.
//! Background work is started with `tokio::task::spawn_local`, so these
//! types must be created inside a `tokio::task::LocalSet`. Data coming from
//! other threads reaches them through the [`crate::AnySource`] they follow,
//! never by touching them directly.

mod computed;
mod updatable;
mod variable;

use std::rc::Rc;

pub use computed::ComputedViewState;
pub use updatable::UpdatableViewState;
pub use variable::ViewStateVariable;

use crate::Updates;

pub trait ViewStateSource<S> {
	fn state(&self) -> S;

	fn updates(&self) -> Updates;

	/// Sends an update without changing the state, so observers render again.
	fn force_update(&self);
}

/// Type-erased [`ViewStateSource`].
pub struct AnyViewStateSource<S> {
	source: Rc<dyn ViewStateSource<S>>,
}

impl<S> Clone for AnyViewStateSource<S> {
	fn clone(&self) -> Self {
		AnyViewStateSource {
			source: self.source.clone(),
		}
	}
}

impl<S> AnyViewStateSource<S> {
	pub fn new(source: impl ViewStateSource<S> + 'static) -> Self {
		AnyViewStateSource {
			source: Rc::new(source),
		}
	}
}

impl<S> ViewStateSource<S> for AnyViewStateSource<S> {
	fn state(&self) -> S {
		self.source.state()
	}

	fn updates(&self) -> Updates {
		self.source.updates()
	}

	fn force_update(&self) {
		self.source.force_update()
	}
}

/// Two-way binding to a piece of view state.
pub struct Binding<V> {
	get: Rc<dyn Fn() -> V>,
	set: Rc<dyn Fn(V)>,
}

impl<V> Clone for Binding<V> {
	fn clone(&self) -> Self {
		Binding {
			get: self.get.clone(),
			set: self.set.clone(),
		}
	}
}

impl<V: 'static> Binding<V> {
	pub fn new(get: impl Fn() -> V + 'static, set: impl Fn(V) + 'static) -> Self {
		Binding {
			get: Rc::new(get),
			set: Rc::new(set),
		}
	}

	/// Binding that ignores writes.
	pub fn constant(value: V) -> Self
	where
		V: Clone,
	{
		Binding::new(move || value.clone(), |_| {})
	}

	pub fn get(&self) -> V {
		(self.get)()
	}

	pub fn set(&self, value: V) {
		(self.set)(value)
	}
}
