use std::fmt::Debug;

/// How many times a notifier has signalled a change.
///
/// `ZERO` is the value nobody has observed yet. `MAX` is the terminal
/// sentinel: a notifier that reached it never moves again, and every
/// comparison against it reports a change.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash, Default)]
pub struct Generation(u64);

impl Generation {
	pub const ZERO: Generation = Generation(0);
	pub const MAX: Generation = Generation(u64::MAX);

	pub(crate) const fn from_raw(raw: u64) -> Self {
		Generation(raw)
	}

	pub const fn get(self) -> u64 {
		self.0
	}

	pub const fn is_terminal(self) -> bool {
		self.0 == u64::MAX
	}

	/// Next generation, never stepping onto the terminal sentinel.
	pub(crate) fn next(self) -> Generation {
		if self.is_terminal() {
			return self;
		}
		Generation(self.0.saturating_add(1).min(u64::MAX - 1))
	}

	/// Generation of a notifier combined from two others. Strictly grows
	/// whenever either side does; terminal as soon as either side is.
	pub(crate) fn combine(self, other: Generation) -> Generation {
		if self.is_terminal() || other.is_terminal() {
			return Generation::MAX;
		}
		Generation(self.0.saturating_add(other.0).min(u64::MAX - 1))
	}

	/// Generation of a source layered over `self`, its upstream, with `own`
	/// counting the source's own changes. Terminal only when `own` is. Once
	/// the upstream settles its steps count down from just below `MAX`, so
	/// the settling itself and every later own change still register.
	pub(crate) fn layer(self, own: Generation) -> Generation {
		if own.is_terminal() {
			return Generation::MAX;
		}
		if self.is_terminal() {
			return Generation(u64::MAX - 1 - own.0);
		}
		Generation(self.0.saturating_add(own.0).min(u64::MAX - 2))
	}
}

impl Debug for Generation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if self.is_terminal() {
			f.write_str("Generation(terminal)")
		} else {
			write!(f, "Generation({})", self.0)
		}
	}
}
