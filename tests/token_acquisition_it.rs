#![cfg(all(feature = "reqwest", feature = "test"))]

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use httpmock::prelude::*;
// self
use msal::{
	_preludet::*,
	auth::{ClientId, User},
	authorization::{AgentFuture, AgentResponse, AuthorizationAgent, AuthorizationRequest},
	config::PublicClientConfig,
	dispatch::CommandResult,
	error::{ClientError, ServiceError},
	http::Endpoint,
	request::{AcquireTokenParameters, AcquireTokenSilentParameters, TokenSource},
	store::CachePartition,
};

const CLIENT_ID: &str = "4b0db8c2-9f26-4417-8bde-3f0e3656f8e0";
const REDIRECT_URI: &str = "https://app.contoso.com/auth";

/// Agent that completes every authorization with a fixed code, or cancels.
#[derive(Default)]
struct ScriptedAgent {
	cancel: bool,
	calls: AtomicUsize,
}
impl AuthorizationAgent for ScriptedAgent {
	fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> AgentFuture<'a> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let query = request.authorize_url.query().unwrap_or_default();

			assert!(query.contains("code_challenge_method=S256"));
			assert!(query.contains(&format!("state={}", request.state)));

			if self.cancel {
				return Ok(AgentResponse::Cancelled);
			}

			let mut redirect = request.redirect_uri.clone();

			redirect
				.query_pairs_mut()
				.append_pair("code", "auth-code")
				.append_pair("state", &request.state);

			Ok(AgentResponse::Redirect(redirect))
		})
	}
}

fn https(server: &MockServer, path: &str) -> String {
	format!("https://{}{path}", server.address())
}

fn config(server: &MockServer) -> PublicClientConfig {
	let mut config = PublicClientConfig::new(
		ClientId::new(CLIENT_ID).expect("Client id fixture should be valid."),
		Url::parse(REDIRECT_URI).expect("Redirect fixture should parse."),
	);

	config.authority = https(server, "/common");
	config.validate_authority = false;
	config.http_retry_delay_ms = 0;

	config
}

fn id_token(uid: &str) -> String {
	let claims = format!(
		r#"{{"oid":"{uid}","tid":"contoso","preferred_username":"{uid}@contoso.com"}}"#
	);

	format!("{}.{}.", URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#), URL_SAFE_NO_PAD.encode(claims))
}

fn client_info(uid: &str) -> String {
	URL_SAFE_NO_PAD.encode(format!(r#"{{"uid":"{uid}","utid":"contoso"}}"#))
}

fn token_body(access_token: &str, refresh_token: &str) -> String {
	format!(
		r#"{{"token_type":"Bearer","access_token":"{access_token}","refresh_token":"{refresh_token}","expires_in":3600,"scope":"User.Read","id_token":"{}","client_info":"{}"}}"#,
		id_token("ada"),
		client_info("ada"),
	)
}

async fn mock_discovery(server: &MockServer) -> httpmock::Mock<'_> {
	let document = format!(
		r#"{{"authorization_endpoint":"{}","token_endpoint":"{}","issuer":"https://sts/common"}}"#,
		https(server, "/common/oauth2/v2.0/authorize"),
		https(server, "/common/oauth2/v2.0/token"),
	);

	server
		.mock_async(|when, then| {
			when.method(GET).path("/common/v2.0/.well-known/openid-configuration");
			then.status(200).header("content-type", "application/json").body(document);
		})
		.await
}

async fn mock_code_redemption<'a>(server: &'a MockServer, body: &str) -> httpmock::Mock<'a> {
	let body = body.to_owned();

	server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=authorization_code")
				.body_includes("code=auth-code")
				.body_includes("code_verifier=");
			then.status(200).header("content-type", "application/json").body(body);
		})
		.await
}

async fn sign_in(
	application: &ReqwestTestApplication,
) -> (msal::request::AuthenticationResult, User) {
	let result = application
		.acquire_token(AcquireTokenParameters::new(["User.Read"]))
		.await
		.expect("Interactive acquisition should succeed.")
		.into_success()
		.expect("Interactive acquisition should not be cancelled.");
	let user = result.user.clone().expect("Result should carry the signed-in user.");

	(result, user)
}

#[tokio::test]
async fn interactive_then_silent_is_served_from_cache() {
	let server = MockServer::start_async().await;
	let discovery = mock_discovery(&server).await;
	let token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let agent = Arc::new(ScriptedAgent::default());
	let (application, store) = build_reqwest_test_application(config(&server), agent.clone());
	let (result, user) = sign_in(&application).await;

	assert_eq!(result.access_token.expose(), "at-1");
	assert!(matches!(result.source, TokenSource::IdentityProvider));
	assert_eq!(result.tenant_id.as_deref(), Some("contoso"));
	assert_eq!(user.displayable_id.as_deref(), Some("ada@contoso.com"));
	assert_eq!(store.len(CachePartition::AccessToken), 1);
	assert_eq!(store.len(CachePartition::RefreshToken), 1);

	let silent = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(["User.Read"], Some(user.clone())))
		.await
		.expect("Silent acquisition should hit the cache.");

	assert_eq!(silent.access_token.expose(), "at-1");
	assert!(matches!(silent.source, TokenSource::Cache));

	discovery.assert_calls_async(1).await;
	token.assert_calls_async(1).await;

	assert_eq!(agent.calls.load(Ordering::SeqCst), 1);
	assert_eq!(application.users().await.expect("Users should list."), vec![user.clone()]);
	assert_eq!(application.remove_user(&user).await.expect("Removal should succeed."), 2);
	assert!(application.users().await.expect("Users should list.").is_empty());

	let err = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(["User.Read"], Some(user)))
		.await
		.expect_err("A removed user has nothing to refresh.");

	assert!(err.is_ui_required());
}

#[tokio::test]
async fn agent_cancellation_is_not_an_error() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let agent = Arc::new(ScriptedAgent { cancel: true, ..Default::default() });
	let (application, store) = build_reqwest_test_application(config(&server), agent);
	let outcome = application
		.acquire_token(AcquireTokenParameters::new(["User.Read"]))
		.await
		.expect("Cancellation should resolve successfully.");

	assert!(matches!(outcome, CommandResult::Cancelled));

	token.assert_calls_async(0).await;

	assert_eq!(store.len(CachePartition::AccessToken), 0);
}

#[tokio::test]
async fn rejected_refresh_token_is_deleted_and_requires_interaction() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token")
				.body_includes("refresh_token=rt-1");
			then.status(400).header("content-type", "application/json").body(
				r#"{"error":"invalid_grant","error_description":"AADSTS70008: The refresh token has expired.","error_codes":[70008]}"#,
			);
		})
		.await;
	let (application, store) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let mut parameters = AcquireTokenSilentParameters::new(["User.Read"], Some(user));

	parameters.force_refresh = true;

	let err = application
		.acquire_token_silent(parameters)
		.await
		.expect_err("A rejected grant should require interaction.");

	refresh.assert_calls_async(1).await;

	let Error::UiRequired { source: Some(source), .. } = &err else {
		panic!("Expected UiRequired with a cause, got {err:?}.");
	};

	assert!(source.is_invalid_grant());
	assert_eq!(store.len(CachePartition::RefreshToken), 0);
	assert_eq!(application.refresh_metrics().snapshot().rejected_grants, 1);
}

#[tokio::test]
async fn other_refresh_rejections_keep_the_refresh_token() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let _refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_request","error_description":"AADSTS90014: missing field."}"#);
		})
		.await;
	let (application, store) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let mut parameters = AcquireTokenSilentParameters::new(["User.Read"], Some(user));

	parameters.force_refresh = true;

	let err = application
		.acquire_token_silent(parameters)
		.await
		.expect_err("A rejected request should require interaction.");
	let Error::UiRequired { source: Some(source), .. } = &err else {
		panic!("Expected UiRequired with a cause, got {err:?}.");
	};

	assert_eq!(source.service_error_code(), Some("invalid_request"));
	assert_eq!(store.len(CachePartition::RefreshToken), 1);
}

#[tokio::test]
async fn forced_refresh_replaces_the_cached_access_token() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let refresh_body = token_body("at-2", "rt-2");
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token")
				.body_includes("refresh_token=rt-1");
			then.status(200).header("content-type", "application/json").body(refresh_body);
		})
		.await;
	let (application, store) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let mut parameters = AcquireTokenSilentParameters::new(["User.Read"], Some(user.clone()));

	parameters.force_refresh = true;

	let refreshed =
		application.acquire_token_silent(parameters).await.expect("Refresh should succeed.");

	refresh.assert_calls_async(1).await;

	assert_eq!(refreshed.access_token.expose(), "at-2");
	assert!(matches!(refreshed.source, TokenSource::IdentityProvider));
	assert_eq!(store.len(CachePartition::AccessToken), 1);
	assert_eq!(store.len(CachePartition::RefreshToken), 1);

	let cached = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(["User.Read"], Some(user)))
		.await
		.expect("The refreshed token should be cached.");

	assert_eq!(cached.access_token.expose(), "at-2");
	assert_eq!(application.refresh_metrics().snapshot().successes, 1);
}

#[tokio::test]
async fn concurrent_forced_refreshes_hit_the_token_endpoint_once() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _token = mock_code_redemption(&server, &token_body("at-1", "rt-1")).await;
	let refresh_body = token_body("at-2", "rt-2");
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token");
			then.status(200)
				.header("content-type", "application/json")
				.delay(std::time::Duration::from_millis(300))
				.body(refresh_body);
		})
		.await;
	let (application, _) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let forced = || {
		let mut parameters = AcquireTokenSilentParameters::new(["User.Read"], Some(user.clone()));

		parameters.force_refresh = true;

		parameters
	};
	let (first, second) = tokio::join!(
		application.acquire_token_silent(forced()),
		application.acquire_token_silent(forced()),
	);
	let first = first.expect("First forced refresh should succeed.");
	let second = second.expect("Second forced refresh should succeed.");

	assert_eq!(first.access_token.expose(), "at-2");
	assert_eq!(second.access_token.expose(), "at-2");

	refresh.assert_calls_async(1).await;

	assert_eq!(application.refresh_metrics().snapshot().attempts, 1);
}

#[tokio::test]
async fn unavailable_token_endpoint_serves_an_extended_lifetime_token() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let body = format!(
		r#"{{"token_type":"Bearer","access_token":"at-1","refresh_token":"rt-1","expires_in":0,"ext_expires_in":7200,"scope":"User.Read","id_token":"{}","client_info":"{}"}}"#,
		id_token("ada"),
		client_info("ada"),
	);
	let _token = mock_code_redemption(&server, &body).await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token");
			then.status(503);
		})
		.await;
	let mut config = config(&server);

	config.extended_lifetime_enabled = true;

	let (application, _) =
		build_reqwest_test_application(config, Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let result = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(["User.Read"], Some(user)))
		.await
		.expect("An extended-lifetime token should be served while the service is down.");

	refresh.assert_calls_async(2).await;

	assert_eq!(result.access_token.expose(), "at-1");
	assert!(matches!(result.source, TokenSource::Cache));
	assert!(result.extended_lifetime_token);
}

#[tokio::test]
async fn extended_lifetime_is_off_by_default() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let body = format!(
		r#"{{"token_type":"Bearer","access_token":"at-1","refresh_token":"rt-1","expires_in":0,"ext_expires_in":7200,"scope":"User.Read","id_token":"{}","client_info":"{}"}}"#,
		id_token("ada"),
		client_info("ada"),
	);
	let _token = mock_code_redemption(&server, &body).await;
	let _refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/common/oauth2/v2.0/token")
				.body_includes("grant_type=refresh_token");
			then.status(503);
		})
		.await;
	let (application, _) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (_, user) = sign_in(&application).await;
	let err = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(["User.Read"], Some(user)))
		.await
		.expect_err("Without extended lifetime the outage should surface.");

	assert!(err.is_service_unavailable());
}

#[tokio::test]
async fn id_token_stands_in_for_a_missing_access_token() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let body = format!(
		r#"{{"token_type":"Bearer","expires_in":3600,"scope":"User.Read","id_token":"{}","client_info":"{}"}}"#,
		id_token("ada"),
		client_info("ada"),
	);
	let _token = mock_code_redemption(&server, &body).await;
	let (application, _) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let (result, _) = sign_in(&application).await;

	assert_eq!(result.access_token.expose(), id_token("ada"));
	assert_eq!(result.id_token.as_deref(), Some(id_token("ada").as_str()));
}

#[tokio::test]
async fn non_json_error_body_is_a_parse_failure() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/common/oauth2/v2.0/token");
			then.status(502).header("content-type", "text/html").body("<html>Bad Gateway</html>");
		})
		.await;
	let (application, _) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let err = application
		.acquire_token(AcquireTokenParameters::new(["User.Read"]))
		.await
		.expect_err("An HTML body should not parse.");

	token.assert_calls_async(1).await;

	assert!(matches!(
		err,
		Error::Client(ClientError::JsonParse { endpoint: Endpoint::Token, status: 502, .. })
	));
}

#[tokio::test]
async fn token_endpoint_unavailable_twice_is_service_not_available() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/common/oauth2/v2.0/token");
			then.status(503);
		})
		.await;
	let (application, store) =
		build_reqwest_test_application(config(&server), Arc::new(ScriptedAgent::default()));
	let err = application
		.acquire_token(AcquireTokenParameters::new(["User.Read"]))
		.await
		.expect_err("Two 503 answers should fail the request.");

	token.assert_calls_async(2).await;

	assert!(matches!(
		err,
		Error::Service(ServiceError::ServiceNotAvailable { endpoint: Endpoint::Token, status: 503 })
	));
	assert_eq!(store.len(CachePartition::AccessToken), 0);
}

#[tokio::test]
async fn invalid_arguments_fail_before_dispatch() {
	let server = MockServer::start_async().await;
	let discovery = mock_discovery(&server).await;
	let agent = Arc::new(ScriptedAgent::default());
	let (application, _) = build_reqwest_test_application(config(&server), agent.clone());
	let err = application
		.acquire_token(AcquireTokenParameters::new(["openid"]))
		.await
		.expect_err("Reserved scopes should be rejected.");

	assert!(matches!(err, Error::Argument(_)));

	let err = application
		.acquire_token_silent(AcquireTokenSilentParameters::new(Vec::<String>::new(), None))
		.await
		.expect_err("Empty scopes should be rejected.");

	assert!(matches!(err, Error::Argument(_)));

	discovery.assert_calls_async(0).await;

	assert_eq!(agent.calls.load(Ordering::SeqCst), 0);
}
