//! Spans, events, and counters for acquisition and discovery.
//!
//! Every network or IPC step runs inside a [`FlowSpan`]. With the `tracing` feature the span is
//! emitted as `msal.flow` carrying `flow`, `stage`, `correlation_id`, `outcome`, and
//! `elapsed_ms`. With the `metrics` feature each attempt and outcome increments
//! `msal_flow_total` and finished attempts feed the `msal_flow_duration_seconds` histogram. Both
//! are no-ops when disabled.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Interactive acquisition through the authorization UI.
	Interactive,
	/// Silent acquisition from the cache.
	Silent,
	/// Refresh-token redemption.
	Refresh,
	/// AAD instance discovery.
	InstanceDiscovery,
	/// OpenID tenant discovery.
	TenantDiscovery,
	/// ADFS device registration + WebFinger validation.
	AdfsDiscovery,
	/// Token endpoint exchange.
	TokenRequest,
	/// Broker IPC round trip.
	Broker,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Interactive => "interactive",
			FlowKind::Silent => "silent",
			FlowKind::Refresh => "refresh",
			FlowKind::InstanceDiscovery => "instance_discovery",
			FlowKind::TenantDiscovery => "tenant_discovery",
			FlowKind::AdfsDiscovery => "adfs_discovery",
			FlowKind::TokenRequest => "token_request",
			FlowKind::Broker => "broker",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// User cancelled the interactive flow.
	Cancelled,
}
impl FlowOutcome {
	/// Success or failure of `result`.
	pub fn of<T, E>(result: &Result<T, E>) -> Self {
		if result.is_ok() { Self::Success } else { Self::Failure }
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
			FlowOutcome::Cancelled => "cancelled",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
