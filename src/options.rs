/// Tuning for the lazily computed sources.
#[derive(Clone, Debug)]
pub struct Options {
	/// Label attached to log events of the source.
	pub name: &'static str,
	/// How many times in a row queued mutations may be deferred again
	/// because upstream changed while the computation they waited for was
	/// running. Once reached they are applied to the value just computed.
	pub max_restarts: usize,
}

impl Default for Options {
	fn default() -> Self {
		Options {
			name: "<unnamed>",
			max_restarts: 8,
		}
	}
}

impl Options {
	pub fn named(name: &'static str) -> Self {
		Options {
			name,
			..Default::default()
		}
	}

	pub fn max_restarts(mut self, max_restarts: usize) -> Self {
		self.max_restarts = max_restarts;
		self
	}
}
