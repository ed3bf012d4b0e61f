//! In-process token acquisition: cache lookup, refresh-token redemption, and the interactive
//! authorization-code flow.
//!
//! Silent requests follow a fixed ladder: resolve the authority, serve an unexpired access
//! token unless `force_refresh` is set, then redeem the cached refresh token under a
//! per-token singleflight guard. Rejected refresh tokens become [`Error::UiRequired`]; an
//! `invalid_grant` also deletes the refresh token so the next silent call does not repeat it.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	authority::{AuthorityResolver, ResolvedAuthority},
	authorization::{
		AuthorizationAgent, AuthorizationParameters, AuthorizationRequest, AuthorizationResult,
	},
	cache::{CacheQuery, CacheTarget, RefreshTokenCacheItem, TokenCache},
	controller::{Controller, ControllerFuture, RefreshMetrics},
	dispatch::CommandResult,
	error::ServiceError,
	http::{HttpExecutor, TokenHttpClient, TransportErrorMapper},
	oauth::{OAuth2Client, TokenResponse, params},
	obs::{self, FlowKind, FlowSpan},
	request::{
		AuthenticationResult, InteractiveRequest, RequestContext, SilentRequest, TokenSource,
	},
};

/// Controller backed by the local cache and the token endpoint.
pub struct LocalController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	executor: HttpExecutor<C, M>,
	resolver: AuthorityResolver<C, M>,
	cache: Arc<TokenCache>,
	agent: Arc<dyn AuthorizationAgent>,
	extended_lifetime_enabled: bool,
	refresh_metrics: Arc<RefreshMetrics>,
	flow_guards: FlowGuards,
}
impl<C, M> LocalController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a controller with extended lifetime disabled.
	pub fn new(
		executor: HttpExecutor<C, M>,
		resolver: AuthorityResolver<C, M>,
		cache: Arc<TokenCache>,
		agent: Arc<dyn AuthorizationAgent>,
	) -> Self {
		Self {
			executor,
			resolver,
			cache,
			agent,
			extended_lifetime_enabled: false,
			refresh_metrics: Default::default(),
			flow_guards: Default::default(),
		}
	}

	/// Serves tokens inside their extended lifetime when the token endpoint is unavailable.
	pub fn with_extended_lifetime(mut self, enabled: bool) -> Self {
		self.extended_lifetime_enabled = enabled;

		self
	}

	/// Refresh counters.
	pub fn refresh_metrics(&self) -> &Arc<RefreshMetrics> {
		&self.refresh_metrics
	}

	/// Authority resolver.
	pub fn resolver(&self) -> &AuthorityResolver<C, M> {
		&self.resolver
	}

	/// Token cache.
	pub fn cache(&self) -> &Arc<TokenCache> {
		&self.cache
	}

	async fn acquire_interactive(&self, request: &InteractiveRequest) -> Result<CommandResult> {
		let context = &request.context;
		let resolved = self
			.resolver
			.resolve(
				&context.authority,
				context.validate_authority,
				request.login_hint.as_deref(),
				context.correlation_id,
			)
			.await?;
		let wire_scopes = request.wire_scopes();
		let authorization = AuthorizationRequest::new(
			&resolved.endpoints,
			&AuthorizationParameters {
				client_id: &context.client_id,
				redirect_uri: &context.redirect_uri,
				scopes: &wire_scopes,
				login_hint: request.login_hint.as_deref(),
				prompt: request.prompt,
				extra_query_parameters: &request.extra_query_parameters,
				correlation_id: context.correlation_id,
			},
		);
		let response = self.agent.authorize(&authorization).await?;
		let code = match authorization.complete(response)? {
			AuthorizationResult::Code(code) => code,
			AuthorizationResult::Cancelled => return Ok(CommandResult::Cancelled),
		};
		let success = OAuth2Client::new(self.executor.clone(), context.correlation_id)
			.with_body_parameter(params::GRANT_TYPE, params::AUTHORIZATION_CODE_GRANT)
			.with_body_parameter(params::CLIENT_ID, context.client_id.to_string())
			.with_body_parameter(params::SCOPE, wire_scopes.normalized())
			.with_body_parameter(params::CODE, code)
			.with_body_parameter(params::REDIRECT_URI, context.redirect_uri.as_str())
			.with_body_parameter(params::CODE_VERIFIER, authorization.code_verifier())
			.with_body_parameter(params::CLIENT_INFO, "1")
			.get_token(&resolved.endpoints)
			.await?
			.into_result()?;
		let (item, _) =
			self.cache.save(cache_target(&resolved, context), &context.scopes, &success).await?;

		Ok(CommandResult::Success(AuthenticationResult::from_cache_item(
			&item,
			context.correlation_id,
			TokenSource::IdentityProvider,
		)))
	}

	async fn acquire_silent(&self, request: &SilentRequest) -> Result<AuthenticationResult> {
		let context = &request.context;
		let login_hint = request.user.as_ref().and_then(|user| user.displayable_id.as_deref());
		let resolved = self
			.resolver
			.resolve(
				&context.authority,
				context.validate_authority,
				login_hint,
				context.correlation_id,
			)
			.await?;
		let query = CacheQuery {
			authority: resolved.authority.as_str(),
			authority_host: resolved.authority.host(),
			client_id: &context.client_id,
			scopes: &context.scopes,
			policy: resolved.authority.policy(),
			user: request.user.as_ref(),
		};

		if let Some(result) = self.cached_result(request, &query).await? {
			return Ok(result);
		}

		let seen = if request.force_refresh {
			self.cache.find_access_token(&query).await?.map(|item| item.access_token)
		} else {
			None
		};
		let key = self.cached_refresh_token(&query).await?.key()?;
		let guard = self.flow_guards.acquire(key.as_str());
		let result = {
			let _singleflight = guard.lock().await;

			self.refresh_once(&resolved, request, &query, seen.as_ref()).await
		};

		self.flow_guards.release(key.as_str(), guard);

		result
	}

	async fn refresh_once(
		&self,
		resolved: &ResolvedAuthority,
		request: &SilentRequest,
		query: &CacheQuery<'_>,
		seen: Option<&TokenSecret>,
	) -> Result<AuthenticationResult> {
		// Another caller may have refreshed while this one waited on the guard. A forced
		// refresh only accepts a token that differs from the one cached before it waited.
		if let Some(item) = self.cache.find_access_token(query).await?
			&& Some(&item.access_token) != seen
		{
			return Ok(AuthenticationResult::from_cache_item(
				&item,
				request.context.correlation_id,
				TokenSource::Cache,
			));
		}

		let refresh = self.cached_refresh_token(query).await?;

		self.redeem_refresh_token(resolved, &request.context, query, &refresh).await
	}

	async fn cached_result(
		&self,
		request: &SilentRequest,
		query: &CacheQuery<'_>,
	) -> Result<Option<AuthenticationResult>> {
		if request.force_refresh {
			return Ok(None);
		}

		let item = self.cache.find_access_token(query).await?;

		Ok(item.map(|item| {
			AuthenticationResult::from_cache_item(
				&item,
				request.context.correlation_id,
				TokenSource::Cache,
			)
		}))
	}

	async fn cached_refresh_token(&self, query: &CacheQuery<'_>) -> Result<RefreshTokenCacheItem> {
		self.cache
			.find_refresh_token(query)
			.await?
			.ok_or_else(|| Error::ui_required("no refresh token is cached for this request"))
	}

	async fn redeem_refresh_token(
		&self,
		resolved: &ResolvedAuthority,
		context: &RequestContext,
		query: &CacheQuery<'_>,
		refresh: &RefreshTokenCacheItem,
	) -> Result<AuthenticationResult> {
		let span = FlowSpan::new(FlowKind::Refresh, "redeem_refresh_token")
			.with_correlation_id(context.correlation_id);

		self.refresh_metrics.record_attempt();

		let result: Result<AuthenticationResult> = span
			.instrument(async {
				let response = OAuth2Client::new(self.executor.clone(), context.correlation_id)
					.with_body_parameter(params::GRANT_TYPE, params::REFRESH_TOKEN_GRANT)
					.with_body_parameter(params::CLIENT_ID, context.client_id.to_string())
					.with_body_parameter(params::SCOPE, context.scopes.with_reserved().normalized())
					.with_body_parameter(params::REFRESH_TOKEN, refresh.refresh_token.expose())
					.with_body_parameter(params::CLIENT_INFO, "1")
					.get_token(&resolved.endpoints)
					.await
					.and_then(TokenResponse::into_result);

				match response {
					Ok(success) => {
						let (item, _) = self
							.cache
							.save(cache_target(resolved, context), &context.scopes, &success)
							.await?;

						Ok(AuthenticationResult::from_cache_item(
							&item,
							context.correlation_id,
							TokenSource::IdentityProvider,
						))
					},
					Err(e) => self.recover_refresh_failure(e, query, refresh, context).await,
				}
			})
			.await;

		match &result {
			Ok(_) => self.refresh_metrics.record_success(),
			Err(_) => self.refresh_metrics.record_failure(),
		}

		span.finish_with(&result);

		result
	}

	async fn recover_refresh_failure(
		&self,
		error: Error,
		query: &CacheQuery<'_>,
		refresh: &RefreshTokenCacheItem,
		context: &RequestContext,
	) -> Result<AuthenticationResult> {
		if error.is_invalid_grant() {
			self.refresh_metrics.record_rejected_grant();

			if let Err(e) = self.cache.remove_refresh_token(refresh).await {
				obs::warn(format_args!("Failed to delete rejected refresh token: {e}"));
			}

			return Err(Error::ui_required_with("the refresh token was rejected", error));
		}
		if is_request_rejection(&error) {
			return Err(Error::ui_required_with(
				"the token endpoint rejected the refresh request",
				error,
			));
		}
		if self.extended_lifetime_enabled
			&& error.is_service_unavailable()
			&& let Ok(Some(item)) = self.cache.find_extended_access_token(query).await
		{
			obs::warn(format_args!(
				"Token endpoint unavailable; serving a token inside its extended lifetime"
			));

			let mut result = AuthenticationResult::from_cache_item(
				&item,
				context.correlation_id,
				TokenSource::Cache,
			);

			result.extended_lifetime_token = item.expires_on <= OffsetDateTime::now_utc();

			return Ok(result);
		}

		Err(error)
	}
}
impl<C, M> Controller for LocalController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn name(&self) -> &'static str {
		"local"
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
impl<C, M> Debug for LocalController<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LocalController")
			.field("resolver", &self.resolver)
			.field("cache", &self.cache)
			.field("extended_lifetime_enabled", &self.extended_lifetime_enabled)
			.field("refresh_metrics", &self.refresh_metrics)
			.finish()
	}
}

/// Per-refresh-token singleflight locks; an entry lives only while some caller holds it.
#[derive(Debug, Default)]
struct FlowGuards(Mutex<HashMap<String, Arc<AsyncMutex<()>>>>);
impl FlowGuards {
	fn acquire(&self, key: &str) -> Arc<AsyncMutex<()>> {
		let mut guards = self.0.lock();

		guards.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	fn release(&self, key: &str, guard: Arc<AsyncMutex<()>>) {
		let mut guards = self.0.lock();

		// One reference in the map plus the caller's own means nobody else is waiting.
		if Arc::strong_count(&guard) == 2 {
			guards.remove(key);
		}
	}

	#[cfg(test)]
	fn len(&self) -> usize {
		self.0.lock().len()
	}
}

fn cache_target<'a>(
	resolved: &'a ResolvedAuthority,
	context: &'a RequestContext,
) -> CacheTarget<'a> {
	CacheTarget {
		authority: resolved.authority.as_str(),
		authority_host: resolved.authority.host(),
		client_id: &context.client_id,
		policy: resolved.authority.policy(),
	}
}

// Any 4xx OAuth error body from the token endpoint.
fn is_request_rejection(error: &Error) -> bool {
	matches!(
		error,
		Error::Service(ServiceError::Endpoint { status: Some(status), .. })
			if (400..500).contains(status)
	)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn flow_guards_are_dropped_once_the_last_holder_releases() {
		let guards = FlowGuards::default();
		let first = guards.acquire("rt-key");
		let second = guards.acquire("rt-key");

		assert!(Arc::ptr_eq(&first, &second));

		let held = first.lock().await;

		assert!(second.try_lock().is_none());

		drop(held);
		guards.release("rt-key", first);

		assert_eq!(guards.len(), 1);

		guards.release("rt-key", second);

		assert_eq!(guards.len(), 0);

		let fresh = guards.acquire("rt-key");

		assert!(fresh.try_lock().is_some());
		assert_eq!(guards.len(), 1);
	}
}
