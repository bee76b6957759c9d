/// Scheduling lanes for pooled work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Work a caller is blocked on. Never dropped, always scheduled first.
	Explicit,
	/// Work nobody has asked for yet. Rejected when its lane is full.
	Speculative,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Explicit => "explicit",
			Self::Speculative => "speculative",
		}
	}
}
