//! Top-level public client facade.
//!
//! [`PublicClientApplication`] owns every piece of shared state: the authority registry, the
//! token cache, the local controller, and the command dispatcher. Nothing is process-global, so
//! two applications in one process never observe each other's authorities or tokens.

// self
use crate::{
	_prelude::*,
	auth::User,
	authority::{Authority, AuthorityRegistry, AuthorityResolver},
	authorization::AuthorizationAgent,
	broker::{BrokerEnvironment, BrokerIneligibility, select_broker_transport},
	cache::TokenCache,
	config::PublicClientConfig,
	controller::{BrokerController, Controller, LocalController, RefreshMetrics},
	dispatch::{AuthenticationCallback, Command, CommandDispatcher, CommandHandle, CommandResult},
	http::{HttpExecutor, TokenHttpClient, TransportErrorMapper},
	obs,
	request::{AcquireTokenParameters, AcquireTokenSilentParameters, AuthenticationResult},
	store::TokenCacheStore,
};
#[cfg(feature = "reqwest")]
use crate::http::{ReqwestHttpClient, ReqwestTransportErrorMapper};

/// Application specialized for the crate's default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestPublicClientApplication =
	PublicClientApplication<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Public client application: acquires tokens interactively or silently for one client id.
///
/// Construction validates the configuration and starts the dispatcher, so it must happen
/// inside a Tokio runtime.
pub struct PublicClientApplication<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: PublicClientConfig,
	local: Arc<LocalController<C, M>>,
	dispatcher: CommandDispatcher,
	broker_environment: Option<Arc<dyn BrokerEnvironment>>,
}
impl<C, M> PublicClientApplication<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an application that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: PublicClientConfig,
		store: Arc<dyn TokenCacheStore>,
		agent: Arc<dyn AuthorizationAgent>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		config.validate()?;

		let executor = HttpExecutor::new(http_client, mapper, config.http_retry_delay());
		let resolver = AuthorityResolver::new(
			executor.clone(),
			Arc::new(AuthorityRegistry::default()),
			config.discovery_endpoints()?,
		);
		let cache = Arc::new(TokenCache::with_expiration_buffer(store, config.expiration_buffer()));
		let local = LocalController::new(executor, resolver, cache, agent)
			.with_extended_lifetime(config.extended_lifetime_enabled);
		let dispatcher = CommandDispatcher::new(config.max_concurrent_silent)?;

		Ok(Self { config, local: Arc::new(local), dispatcher, broker_environment: None })
	}

	/// Attaches the platform probe used for broker eligibility.
	pub fn with_broker_environment(mut self, environment: Arc<dyn BrokerEnvironment>) -> Self {
		self.broker_environment = Some(environment);

		self
	}

	/// Validated configuration.
	pub fn config(&self) -> &PublicClientConfig {
		&self.config
	}

	/// Resolved-authority registry owned by this application.
	pub fn registry(&self) -> &Arc<AuthorityRegistry> {
		self.local.resolver().registry()
	}

	/// Token cache owned by this application.
	pub fn cache(&self) -> &Arc<TokenCache> {
		self.local.cache()
	}

	/// Refresh counters of the local controller.
	pub fn refresh_metrics(&self) -> &Arc<RefreshMetrics> {
		self.local.refresh_metrics()
	}

	/// Correlation id of the interactive request currently on screen, if any.
	pub fn current_interactive(&self) -> Option<Uuid> {
		self.dispatcher.current_interactive()
	}

	/// Acquires a token interactively; user cancellation resolves to
	/// [`CommandResult::Cancelled`].
	pub async fn acquire_token(&self, parameters: AcquireTokenParameters) -> Result<CommandResult> {
		let command = self.interactive_command(parameters)?;

		self.dispatcher.dispatch(command).await
	}

	/// Callback form of [`Self::acquire_token`]; argument errors are returned before dispatch.
	pub fn acquire_token_with_callback(
		&self,
		parameters: AcquireTokenParameters,
		callback: Arc<dyn AuthenticationCallback>,
	) -> Result<CommandHandle> {
		let command = self.interactive_command(parameters)?;

		self.dispatcher.submit(command, callback)
	}

	/// Acquires a token without user interaction.
	///
	/// The local cache and token endpoint are consulted first; the broker is asked only when
	/// the local path requires interaction, the request names a user, and the broker is
	/// eligible.
	pub async fn acquire_token_silent(
		&self,
		parameters: AcquireTokenSilentParameters,
	) -> Result<AuthenticationResult> {
		let command = self.silent_command(parameters)?;

		match self.dispatcher.dispatch(command).await? {
			CommandResult::Success(result) => Ok(result),
			CommandResult::Cancelled => Err(Error::ui_required("the silent request was cancelled")),
		}
	}

	/// Callback form of [`Self::acquire_token_silent`].
	pub fn acquire_token_silent_with_callback(
		&self,
		parameters: AcquireTokenSilentParameters,
		callback: Arc<dyn AuthenticationCallback>,
	) -> Result<CommandHandle> {
		let command = self.silent_command(parameters)?;

		self.dispatcher.submit(command, callback)
	}

	/// Distinct users holding refresh tokens for this client id.
	pub async fn users(&self) -> Result<Vec<User>> {
		self.local.cache().users(&self.config.client_id).await
	}

	/// Signs `user` out locally by deleting every token they hold for this client id.
	///
	/// Returns the number of removed cache records.
	pub async fn remove_user(&self, user: &User) -> Result<usize> {
		self.local.cache().remove_user(&self.config.client_id, user).await
	}

	/// Whether requests against `authority` would be served by the broker.
	pub fn broker_eligible(&self, authority: &Authority) -> bool {
		self.broker_controller(authority).is_ok()
	}

	fn interactive_command(&self, parameters: AcquireTokenParameters) -> Result<Command> {
		let request = parameters.into_request(&self.config)?;
		let controller: Arc<dyn Controller> =
			match self.broker_controller(&request.context.authority) {
				Ok(broker) => Arc::new(broker),
				Err(reason) => {
					obs::debug(format_args!("Interactive request stays local: {reason}"));

					self.local.clone()
				},
			};

		Ok(Command::interactive(request, controller))
	}

	fn silent_command(&self, parameters: AcquireTokenSilentParameters) -> Result<Command> {
		let request = parameters.into_request(&self.config)?;
		let local: Arc<dyn Controller> = self.local.clone();
		let mut controllers = vec![local];

		if request.user.is_some() {
			match self.broker_controller(&request.context.authority) {
				Ok(broker) => controllers.push(Arc::new(broker)),
				Err(reason) =>
					obs::debug(format_args!("Silent request skips the broker: {reason}")),
			}
		}

		Ok(Command::silent(request, controllers))
	}

	fn broker_controller(
		&self,
		authority: &Authority,
	) -> Result<BrokerController, BrokerIneligibility> {
		let transport = select_broker_transport(
			authority,
			&self.config.broker_policy(),
			self.broker_environment.as_deref(),
		)?;

		Ok(BrokerController::new(transport, self.config.broker_timeout()))
	}
}
#[cfg(feature = "reqwest")]
impl PublicClientApplication<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an application that provisions its own reqwest transport with the configured
	/// request timeout.
	pub fn new(
		config: PublicClientConfig,
		store: Arc<dyn TokenCacheStore>,
		agent: Arc<dyn AuthorizationAgent>,
	) -> Result<Self> {
		let http_client = ReqwestHttpClient::with_timeout(config.http_timeout())?;

		Self::with_http_client(
			config,
			store,
			agent,
			http_client,
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for PublicClientApplication<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PublicClientApplication")
			.field("client_id", &self.config.client_id)
			.field("local", &self.local)
			.field("dispatcher", &self.dispatcher)
			.field("broker_environment_set", &self.broker_environment.is_some())
			.finish()
	}
}
