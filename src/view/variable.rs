use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::{Rc, Weak};

use enclose::enclose;

use crate::notifier::ChangeNotifier;
use crate::view::{AnyViewStateSource, Binding, ViewStateSource};
use crate::Updates;

/// View state owned by the UI thread.
pub struct ViewStateVariable<S> {
	body: Rc<ViewStateBody<S>>,
}

pub(crate) struct ViewStateBody<S> {
	state: RefCell<S>,
	notifier: ChangeNotifier,
}

impl<S> Clone for ViewStateVariable<S> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<S> ViewStateVariable<S>
where
	S: Clone + PartialEq + 'static,
{
	pub fn new(state: S) -> Self {
		ViewStateVariable {
			body: Rc::new(ViewStateBody {
				state: RefCell::new(state),
				notifier: ChangeNotifier::new(),
			}),
		}
	}

	pub(crate) fn downgrade(&self) -> Weak<ViewStateBody<S>> {
		Rc::downgrade(&self.body)
	}

	pub(crate) fn upgrade(body: &Weak<ViewStateBody<S>>) -> Option<Self> {
		body.upgrade().map(|body| ViewStateVariable { body })
	}

	pub fn state(&self) -> S {
		self.body.state.borrow().clone()
	}

	pub fn with<R>(&self, func: impl FnOnce(&S) -> R) -> R {
		func(&self.body.state.borrow())
	}

	pub fn set(&self, state: S) {
		let changed = {
			let mut current = self.body.state.borrow_mut();
			if *current != state {
				*current = state;
				true
			} else {
				false
			}
		};

		if changed {
			self.body.notifier.send_update();
		}
	}

	pub fn mutate(&self, func: impl FnOnce(&mut S)) {
		let changed = {
			let mut current = self.body.state.borrow_mut();
			let previous = current.clone();
			func(&mut current);
			*current != previous
		};

		if changed {
			self.body.notifier.send_update();
		}
	}

	/// Binding to one part of the state. Writing through it publishes the
	/// change like [`ViewStateVariable::mutate`].
	pub fn binding<V: 'static>(
		&self,
		getter: impl Fn(&S) -> V + 'static,
		setter: impl Fn(&mut S, V) + 'static,
	) -> Binding<V> {
		let this = self.clone();
		Binding::new(
			enclose!((this) move || { this.with(&getter) }),
			move |value| this.mutate(|state| setter(state, value)),
		)
	}

	pub fn updates(&self) -> Updates {
		self.body.notifier.updates()
	}

	pub fn force_update(&self) {
		self.body.notifier.send_update();
	}
}

impl<S> ViewStateSource<S> for ViewStateVariable<S>
where
	S: Clone + PartialEq + 'static,
{
	fn state(&self) -> S {
		ViewStateVariable::state(self)
	}

	fn updates(&self) -> Updates {
		ViewStateVariable::updates(self)
	}

	fn force_update(&self) {
		ViewStateVariable::force_update(self)
	}
}

impl<S> From<ViewStateVariable<S>> for AnyViewStateSource<S>
where
	S: Clone + PartialEq + 'static,
{
	fn from(variable: ViewStateVariable<S>) -> Self {
		AnyViewStateSource::new(variable)
	}
}

impl<S: Debug> Debug for ViewStateVariable<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.body.state.borrow().fmt(f)
	}
}
