//! Refresh-token redemption counters.

// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of [`RefreshMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshCounts {
	/// Refresh-token redemptions started.
	pub attempts: u64,
	/// Redemptions that produced a token.
	pub successes: u64,
	/// Redemptions that failed for any reason, rejected grants included.
	pub failures: u64,
	/// Failures where the service answered `invalid_grant` and the refresh token was dropped.
	pub rejected_grants: u64,
}

/// Refresh-token redemption counters of one local controller.
#[derive(Debug, Default)]
pub struct RefreshMetrics([AtomicU64; 4]);
impl RefreshMetrics {
	const ATTEMPTS: usize = 0;
	const SUCCESSES: usize = 1;
	const FAILURES: usize = 2;
	const REJECTED_GRANTS: usize = 3;

	/// Reads all counters.
	pub fn snapshot(&self) -> RefreshCounts {
		let load = |slot: usize| self.0[slot].load(Ordering::Relaxed);

		RefreshCounts {
			attempts: load(Self::ATTEMPTS),
			successes: load(Self::SUCCESSES),
			failures: load(Self::FAILURES),
			rejected_grants: load(Self::REJECTED_GRANTS),
		}
	}

	pub(crate) fn record_attempt(&self) {
		self.bump(Self::ATTEMPTS);
	}

	pub(crate) fn record_success(&self) {
		self.bump(Self::SUCCESSES);
	}

	pub(crate) fn record_failure(&self) {
		self.bump(Self::FAILURES);
	}

	pub(crate) fn record_rejected_grant(&self) {
		self.bump(Self::REJECTED_GRANTS);
	}

	fn bump(&self, slot: usize) {
		self.0[slot].fetch_add(1, Ordering::Relaxed);
	}
}
