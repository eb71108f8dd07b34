use std::cmp;
use std::time::Duration;

use crate::model::encoder::RestartPolicy;

impl Default for RestartPolicy {
	fn default() -> Self {
		RestartPolicy {
			max_restarts: 5,
			initial_backoff: Duration::from_millis(500),
			max_backoff: Duration::from_secs(10),
			stable_after: Duration::from_secs(10),
			stop_grace: Duration::from_secs(3),
		}
	}
}

impl RestartPolicy {
	/// Delay before restart number `attempt` (1-based), doubling up to `max_backoff`.
	pub fn backoff(&self, attempt: u32) -> Duration {
		let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
		cmp::min(self.initial_backoff.saturating_mul(factor), self.max_backoff)
	}
}
