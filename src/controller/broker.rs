//! Broker-backed token acquisition over one selected transport.

// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	broker::{
		BrokerBundle, BrokerOperation, BrokerResult, BrokerTransport, BrokerTransportKind, keys,
	},
	controller::{Controller, ControllerFuture},
	dispatch::CommandResult,
	error::{ArgumentError, ClientError, ServiceError},
	http::Endpoint,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	request::{
		AuthenticationResult, InteractiveRequest, RequestContext, SilentRequest, TokenSource,
	},
};

/// Broker error codes that call for an interactive request.
pub const UI_REQUIRED_BROKER_ERRORS: [&str; 4] =
	["invalid_grant", "interaction_required", "no_tokens_found", "no_account_found"];

/// Controller that forwards requests to the broker.
///
/// Broker-issued tokens stay in the broker; nothing is written to the local cache.
pub struct BrokerController {
	transport: Arc<dyn BrokerTransport>,
	timeout: std::time::Duration,
}
impl BrokerController {
	/// Creates a controller bound to `transport`; each IPC call is limited to `timeout`.
	pub fn new(transport: Arc<dyn BrokerTransport>, timeout: std::time::Duration) -> Self {
		Self { transport, timeout }
	}

	/// Transport this controller talks through.
	pub fn transport_kind(&self) -> BrokerTransportKind {
		self.transport.kind()
	}

	async fn acquire_interactive(&self, request: &InteractiveRequest) -> Result<CommandResult> {
		let context = &request.context;
		let mut bundle = request_bundle(context, &request.wire_scopes())
			.with(keys::PROMPT, request.prompt.as_str());

		if let Some(hint) = &request.login_hint {
			bundle.insert(keys::LOGIN_HINT, hint.as_str());
		}

		match self.call(BrokerOperation::AcquireTokenInteractive, bundle, context).await? {
			BrokerResult::Cancelled => Ok(CommandResult::Cancelled),
			result => into_authentication_result(result, context).map(CommandResult::Success),
		}
	}

	async fn acquire_silent(&self, request: &SilentRequest) -> Result<AuthenticationResult> {
		let context = &request.context;
		let user = request
			.user
			.as_ref()
			.ok_or(ArgumentError::MissingUser { operation: "broker silent acquisition" })?;
		let mut bundle = request_bundle(context, &context.scopes.with_reserved())
			.with(keys::HOME_ACCOUNT_ID, user.user_identifier())
			.with(keys::FORCE_REFRESH, request.force_refresh.to_string());

		if let Some(hint) = &user.displayable_id {
			bundle.insert(keys::LOGIN_HINT, hint.as_str());
		}

		match self.call(BrokerOperation::AcquireTokenSilent, bundle, context).await? {
			BrokerResult::Cancelled =>
				Err(Error::ui_required("the broker cancelled a silent request")),
			result => into_authentication_result(result, context),
		}
	}

	async fn call(
		&self,
		operation: BrokerOperation,
		bundle: BrokerBundle,
		context: &RequestContext,
	) -> Result<BrokerResult> {
		let transport = self.transport.kind();
		let span = FlowSpan::new(FlowKind::Broker, operation.as_str())
			.with_correlation_id(context.correlation_id);
		let result: Result<BrokerResult> = span
			.instrument(async {
				obs::debug(format_args!("Calling the broker over {transport}"));

				let answer =
					match tokio::time::timeout(self.timeout, self.transport.send(operation, bundle))
						.await
					{
						Ok(Ok(answer)) => answer,
						Ok(Err(source)) => {
							let error = ClientError::BrokerCommunication { transport, source };

							return Err(error.into());
						},
						Err(_) =>
							return Err(ClientError::BrokerTimeout {
								transport,
								timeout: Duration::try_from(self.timeout).unwrap_or(Duration::MAX),
							}
							.into()),
					};

				Ok(BrokerResult::from_bundle(&answer)?)
			})
			.await;

		span.finish(match &result {
			Ok(BrokerResult::Success(_)) => FlowOutcome::Success,
			Ok(BrokerResult::Cancelled) => FlowOutcome::Cancelled,
			_ => FlowOutcome::Failure,
		});

		result
	}
}
impl Controller for BrokerController {
	fn name(&self) -> &'static str {
		"broker"
	}

	fn acquire_token<'a>(
		&'a self,
		request: &'a InteractiveRequest,
	) -> ControllerFuture<'a, CommandResult> {
		Box::pin(self.acquire_interactive(request))
	}

	fn acquire_token_silent<'a>(
		&'a self,
		request: &'a SilentRequest,
	) -> ControllerFuture<'a, AuthenticationResult> {
		Box::pin(self.acquire_silent(request))
	}
}
impl Debug for BrokerController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BrokerController")
			.field("transport", &self.transport.kind())
			.field("timeout", &self.timeout)
			.finish()
	}
}

fn request_bundle(context: &RequestContext, scopes: &ScopeSet) -> BrokerBundle {
	BrokerBundle::default()
		.with(keys::CLIENT_ID, context.client_id.to_string())
		.with(keys::REDIRECT_URI, context.redirect_uri.as_str())
		.with(keys::SCOPE, scopes.normalized())
		.with(keys::AUTHORITY, context.authority.as_str())
		.with(keys::CORRELATION_ID, context.correlation_id.to_string())
}

fn into_authentication_result(
	result: BrokerResult,
	context: &RequestContext,
) -> Result<AuthenticationResult> {
	match result {
		BrokerResult::Success(tokens) => {
			let user = tokens.user()?;

			Ok(AuthenticationResult {
				tenant_id: tokens
					.tenant_id
					.or_else(|| user.as_ref().and_then(|user| user.tenant_id.clone())),
				access_token: tokens.access_token,
				token_type: tokens.token_type,
				expires_on: tokens.expires_on,
				extended_lifetime_token: false,
				scopes: tokens.scope.unwrap_or_else(|| context.scopes.clone()).without_reserved(),
				id_token: tokens.id_token,
				user,
				authority: tokens.authority.unwrap_or_else(|| context.authority.to_string()),
				correlation_id: context.correlation_id,
				source: TokenSource::Broker,
			})
		},
		BrokerResult::Failure { error_code, description } => {
			let ui_required = UI_REQUIRED_BROKER_ERRORS.contains(&error_code.as_str());
			let error = Error::from(ServiceError::Endpoint {
				endpoint: Endpoint::Broker,
				status: None,
				error_code,
				description,
				error_codes: Vec::new(),
			});

			if ui_required {
				Err(Error::ui_required_with("the broker requires user interaction", error))
			} else {
				Err(error)
			}
		},
		BrokerResult::Cancelled => Err(Error::ui_required("the broker request was cancelled")),
	}
}
