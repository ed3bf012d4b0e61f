//! Controllers execute validated requests against one token source.
//!
//! [`LocalController`] owns the cache + OAuth2 pipeline; [`BrokerController`] forwards to a
//! selected broker transport. The dispatcher decides which controllers a command consults.

pub mod broker;
pub mod local;
pub mod metrics;

pub use broker::BrokerController;
pub use local::LocalController;
pub use metrics::{RefreshCounts, RefreshMetrics};

// self
use crate::{
	_prelude::*,
	dispatch::CommandResult,
	request::{AuthenticationResult, InteractiveRequest, SilentRequest},
};

/// Boxed future returned by [`Controller`] methods.
pub type ControllerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// A token source able to serve interactive and silent requests.
pub trait Controller
where
	Self: Send + Sync,
{
	/// Short label for logs.
	fn name(&self) -> &'static str;

	/// Acquires a token with user interaction; cancellation is a result, not an error.
	fn acquire_token<'a>(
		&'a self,
		request: &'a InteractiveRequest,
	) -> ControllerFuture<'a, CommandResult>;

	/// Acquires a token without user interaction.
	///
	/// Fails with [`Error::UiRequired`] when only an interactive request can proceed.
	fn acquire_token_silent<'a>(
		&'a self,
		request: &'a SilentRequest,
	) -> ControllerFuture<'a, AuthenticationResult>;
}
