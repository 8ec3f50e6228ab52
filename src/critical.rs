use std::fmt::Debug;

use parking_lot::Mutex;

/// A value guarded by a mutex.
///
/// Compound check-then-set logic goes through [`Critical::access`]. The
/// closure passed to `access` must not touch the same `Critical` again:
/// the lock is not reentrant and doing so deadlocks.
#[derive(Default)]
pub struct Critical<T> {
	value: Mutex<T>,
}

impl<T> Critical<T> {
	pub fn new(value: T) -> Self {
		Critical {
			value: Mutex::new(value),
		}
	}

	pub fn get(&self) -> T
	where
		T: Clone,
	{
		self.value.lock().clone()
	}

	pub fn set(&self, value: T) {
		*self.value.lock() = value;
	}

	pub fn exchange(&self, value: T) -> T {
		std::mem::replace(&mut *self.value.lock(), value)
	}

	pub fn access<R>(&self, body: impl FnOnce(&mut T) -> R) -> R {
		body(&mut self.value.lock())
	}

	pub fn into_inner(self) -> T {
		self.value.into_inner()
	}
}

impl<T: Debug> Debug for Critical<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.value.lock().fmt(f)
	}
}
