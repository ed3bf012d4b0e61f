//! Interactive authorization: request construction (state + PKCE), the UI seam, and redirect
//! parsing.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	authority::AuthorityEndpoints,
	error::{ClientError, ServiceError},
	http::Endpoint,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const CANCEL_SUBCODE: &str = "cancel";

/// Boxed future returned by [`AuthorizationAgent::authorize`].
pub type AgentFuture<'a> = Pin<Box<dyn Future<Output = Result<AgentResponse>> + 'a + Send>>;

/// UI collaborator that shows the authorization page and reports where it ended.
///
/// The dispatcher never runs two agents at once, so implementations may assume exclusive
/// ownership of the UI for the duration of a call.
pub trait AuthorizationAgent
where
	Self: Send + Sync,
{
	/// Shows `request.authorize_url` and resolves once the user reaches the redirect URI or
	/// dismisses the UI.
	fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> AgentFuture<'a>;
}

/// What the authorization UI observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentResponse {
	/// The browser navigated to the redirect URI.
	Redirect(Url),
	/// The user closed the UI.
	Cancelled,
}

/// `prompt` behavior for the authorization page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Prompt {
	/// Let the user pick among signed-in accounts.
	#[default]
	SelectAccount,
	/// Require credentials even with an active session.
	ForceLogin,
	/// Show the consent page.
	Consent,
}
impl Prompt {
	/// Wire value.
	pub fn as_str(self) -> &'static str {
		match self {
			Self::SelectAccount => "select_account",
			Self::ForceLogin => "login",
			Self::Consent => "consent",
		}
	}
}

/// PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Inputs for [`AuthorizationRequest::new`].
#[derive(Clone, Debug)]
pub struct AuthorizationParameters<'a> {
	/// Requesting client id.
	pub client_id: &'a str,
	/// Redirect URI registered for the client.
	pub redirect_uri: &'a Url,
	/// Scopes to request, reserved scopes included.
	pub scopes: &'a ScopeSet,
	/// Pre-fills the account name.
	pub login_hint: Option<&'a str>,
	/// Prompt behavior.
	pub prompt: Prompt,
	/// Additional query parameters appended verbatim.
	pub extra_query_parameters: &'a [(String, String)],
	/// Correlation id sent with the request.
	pub correlation_id: Uuid,
}

/// One interactive authorization attempt.
#[derive(Clone)]
pub struct AuthorizationRequest {
	/// Fully-formed authorize URL to show the user.
	pub authorize_url: Url,
	/// Redirect URI the agent watches for.
	pub redirect_uri: Url,
	/// Opaque state that must round-trip through the redirect.
	pub state: String,
	/// Correlation id of the owning command.
	pub correlation_id: Uuid,
	pkce: PkcePair,
}
impl AuthorizationRequest {
	/// Builds the request with fresh state and PKCE values.
	pub fn new(endpoints: &AuthorityEndpoints, params: &AuthorizationParameters<'_>) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let mut url = endpoints.authorization_endpoint.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("response_type", "code");
		pairs.append_pair("client_id", params.client_id);
		pairs.append_pair("redirect_uri", params.redirect_uri.as_str());
		pairs.append_pair("scope", &params.scopes.normalized());
		pairs.append_pair("state", &state);
		pairs.append_pair("code_challenge", &pkce.challenge);
		pairs.append_pair("code_challenge_method", pkce.method.as_str());
		pairs.append_pair("prompt", params.prompt.as_str());
		pairs.append_pair("client_info", "1");
		pairs.append_pair("client-request-id", &params.correlation_id.to_string());

		if let Some(hint) = params.login_hint {
			pairs.append_pair("login_hint", hint);
		}
		for (name, value) in params.extra_query_parameters {
			pairs.append_pair(name, value);
		}

		drop(pairs);

		Self {
			authorize_url: url,
			redirect_uri: params.redirect_uri.clone(),
			state,
			correlation_id: params.correlation_id,
			pkce,
		}
	}

	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE verifier to send with the code redemption.
	pub fn code_verifier(&self) -> &str {
		&self.pkce.verifier
	}

	/// Interprets the agent's answer.
	pub fn complete(&self, response: AgentResponse) -> Result<AuthorizationResult> {
		match response {
			AgentResponse::Redirect(url) => AuthorizationResult::from_redirect(&url, &self.state),
			AgentResponse::Cancelled => Ok(AuthorizationResult::Cancelled),
		}
	}
}
impl Debug for AuthorizationRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationRequest")
			.field("authorize_url", &self.authorize_url)
			.field("redirect_uri", &self.redirect_uri)
			.field("state", &self.state)
			.field("correlation_id", &self.correlation_id)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

/// Outcome of the authorization step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationResult {
	/// Authorization code to redeem.
	Code(String),
	/// The user cancelled.
	Cancelled,
}
impl AuthorizationResult {
	/// Parses a redirect URL.
	///
	/// `error=access_denied&error_subcode=cancel` is a user cancellation. Other errors become
	/// [`ServiceError::Endpoint`] values for the authorization endpoint.
	pub fn from_redirect(redirect: &Url, expected_state: &str) -> Result<Self> {
		let params = redirect.query_pairs().into_owned().collect::<HashMap<_, _>>();

		if let Some(error) = params.get("error") {
			if error == "access_denied"
				&& params.get("error_subcode").is_some_and(|subcode| subcode == CANCEL_SUBCODE)
			{
				return Ok(Self::Cancelled);
			}

			return Err(ServiceError::Endpoint {
				endpoint: Endpoint::Authorization,
				status: None,
				error_code: error.clone(),
				description: params.get("error_description").cloned(),
				error_codes: Vec::new(),
			}
			.into());
		}

		let code = params
			.get("code")
			.filter(|code| !code.is_empty())
			.ok_or(ClientError::MalformedRedirect { reason: "no code or error parameter" })?;

		match params.get("state") {
			Some(state) if state == expected_state => Ok(Self::Code(code.clone())),
			_ => Err(ClientError::StateMismatch.into()),
		}
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
