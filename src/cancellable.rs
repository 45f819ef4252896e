use crate::error::{Error, Result};
use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

/// A cooperative cancellation token shared between a caller and whatever
/// long-running operation it hands off to.
///
/// Cloning a [`Cancellable`] shares the same underlying flag; cancelling any
/// clone cancels all of them. There is no bundled executor to interrupt, so
/// cancellation only takes effect at the suspension points an operation
/// checks explicitly.
#[derive(Debug, Clone, Default)]
pub struct Cancellable(Arc<AtomicBool>);

impl Cancellable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}

	/// Returns `Err(Error::Cancelled)` if this token has been cancelled.
	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() {
			Err(Error::Cancelled)
		} else {
			Ok(())
		}
	}
}
