use std::sync::{Arc, Weak};

use crate::{Result, Source, Updates};

/// Type-erased handle to any data-layer source.
pub struct AnySource<T> {
	source: Arc<dyn Source<T>>,
}

impl<T> Clone for AnySource<T> {
	fn clone(&self) -> Self {
		AnySource {
			source: self.source.clone(),
		}
	}
}

impl<T> AnySource<T>
where
	T: 'static,
{
	pub fn new(source: Arc<dyn Source<T>>) -> Self {
		AnySource { source }
	}

	#[inline]
	pub fn updates(&self) -> Updates {
		self.source.updates()
	}

	#[inline]
	pub async fn current(&self) -> Result<T> {
		self.source.clone().current().await
	}

	pub fn downgrade(&self) -> WeakSource<T> {
		WeakSource {
			source: Arc::downgrade(&self.source),
		}
	}
}

/// Non-owning [`AnySource`]. Derived sources hold their upstreams this way.
pub struct WeakSource<T> {
	source: Weak<dyn Source<T>>,
}

impl<T> Clone for WeakSource<T> {
	fn clone(&self) -> Self {
		WeakSource {
			source: self.source.clone(),
		}
	}
}

impl<T> WeakSource<T>
where
	T: 'static,
{
	pub fn upgrade(&self) -> Option<AnySource<T>> {
		self.source.upgrade().map(AnySource::new)
	}
}
