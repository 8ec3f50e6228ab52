use std::fmt::Debug;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::critical::Critical;
use crate::notifier::ChangeNotifier;
use crate::{AnySource, ComputedVariable, Result, Source, Updates};

/// Synchronously readable and writable observable value.
///
/// Writes are compared with the previous value and only a real change
/// sends an update.
pub struct Variable<T> {
	body: Arc<VariableBody<T>>,
}

pub struct VariableBody<T> {
	value: Critical<T>,
	notifier: ChangeNotifier,
}

impl<T> Clone for Variable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Variable<T>
where
	T: Default + Clone + PartialEq + Send + Sync + 'static,
{
	fn default() -> Self {
		Variable::new(Default::default())
	}
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> Variable<T>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	pub fn new(value: T) -> Self {
		Variable {
			body: Arc::new(VariableBody {
				value: Critical::new(value),
				notifier: ChangeNotifier::new(),
			}),
		}
	}

	/// Derives a lazily computed value from this variable.
	pub fn map<F, R>(&self, func: F) -> ComputedVariable<R>
	where
		F: Fn(T) -> R + Send + Sync + 'static,
		R: Clone + Send + Sync + 'static,
	{
		ComputedVariable::map(self, move |value: T| Ok(func(value)))
	}

	#[inline]
	pub fn get(&self) -> T {
		self.body.value.get()
	}

	#[inline]
	pub fn with<R>(&self, func: impl FnOnce(&T) -> R) -> R {
		self.body.value.access(|value| func(value))
	}

	#[inline]
	pub fn set(&self, value: T) {
		let _ = self.replace(value);
	}

	pub fn replace(&self, value: T) -> T {
		let (previous, changed) = self.body.value.access(|current| {
			let previous = std::mem::replace(current, value);
			let changed = previous != *current;
			(previous, changed)
		});

		if changed {
			self.body.notifier.send_update();
		}
		previous
	}

	/// Transforms the value in place. The closure runs under the lock and
	/// must not touch this variable.
	pub fn mutate(&self, func: impl FnOnce(&mut T)) {
		let changed = self.body.value.access(|value| {
			let previous = value.clone();
			func(value);
			*value != previous
		});

		if changed {
			self.body.notifier.send_update();
		}
	}

	#[inline]
	pub fn toggle(&self)
	where
		T: Toggle,
	{
		self.mutate(T::toggle)
	}

	/// Read/write view of one part of the value.
	pub fn field<V>(
		&self,
		getter: impl Fn(&T) -> V + Send + Sync + 'static,
		setter: impl Fn(&mut T, V) + Send + Sync + 'static,
	) -> Field<T, V> {
		Field {
			variable: self.clone(),
			getter: Arc::new(getter),
			setter: Arc::new(setter),
		}
	}

	pub fn updates(&self) -> Updates {
		self.body.notifier.updates()
	}
}

impl<T> Source<T> for VariableBody<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn updates(&self) -> Updates {
		self.notifier.updates()
	}

	fn current(self: Arc<Self>) -> BoxFuture<'static, Result<T>> {
		Box::pin(futures::future::ready(Ok(self.value.get())))
	}
}

/// Part of a [`Variable`] reached through an explicit getter and setter.
pub struct Field<T, V> {
	variable: Variable<T>,
	getter: Arc<dyn Fn(&T) -> V + Send + Sync>,
	setter: Arc<dyn Fn(&mut T, V) + Send + Sync>,
}

impl<T, V> Clone for Field<T, V> {
	fn clone(&self) -> Self {
		Field {
			variable: self.variable.clone(),
			getter: self.getter.clone(),
			setter: self.setter.clone(),
		}
	}
}

impl<T, V> Field<T, V>
where
	T: Clone + PartialEq + Send + Sync + 'static,
{
	pub fn get(&self) -> V {
		self.variable.with(|value| (self.getter)(value))
	}

	pub fn set(&self, field: V) {
		self.variable.mutate(|value| (self.setter)(value, field))
	}
}

impl<T> From<Variable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(variable: Variable<T>) -> Self {
		AnySource::new(variable.body)
	}
}

impl<T> From<&Variable<T>> for AnySource<T>
where
	T: Clone + Send + Sync + 'static,
{
	fn from(variable: &Variable<T>) -> Self {
		AnySource::new(variable.body.clone())
	}
}

impl<T> Debug for Variable<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.body.value.fmt(f)
	}
}
