//! Error taxonomy shared by discovery, token exchange, cache lookup, and dispatch.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, ScopeValidationError},
	broker::BrokerTransportKind,
	http::Endpoint,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Boxed error used to preserve transport- or collaborator-specific causes.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Canonical error exposed by public APIs.
///
/// User cancellation is deliberately absent: it is delivered as
/// [`CommandResult::Cancelled`](crate::dispatch::CommandResult::Cancelled).
#[derive(Debug, ThisError)]
pub enum Error {
	/// Caller supplied malformed input; never retried.
	#[error(transparent)]
	Argument(#[from] ArgumentError),
	/// Identity endpoint rejected the request or stayed unavailable after the retry.
	#[error(transparent)]
	Service(#[from] ServiceError),
	/// Local failure (parsing, IO, broker IPC) wrapping the underlying cause.
	#[error(transparent)]
	Client(#[from] ClientError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// The caller must re-authenticate interactively.
	#[error("User interaction is required: {reason}.")]
	UiRequired {
		/// Why silent acquisition could not proceed.
		reason: String,
		/// Service error that triggered the requirement, if any.
		#[source]
		source: Option<Box<Error>>,
	},
	/// A lookup without a disambiguating user matched more than one cache entry.
	#[error("Multiple {kind} cache entries found; supply a user to disambiguate.")]
	MultipleCacheEntries {
		/// Cache partition that produced the ambiguity.
		kind: &'static str,
	},
}
impl Error {
	/// Builds a [`Error::UiRequired`] without an underlying cause.
	pub fn ui_required(reason: impl Into<String>) -> Self {
		Self::UiRequired { reason: reason.into(), source: None }
	}

	/// Builds a [`Error::UiRequired`] that preserves `source` as its cause.
	pub fn ui_required_with(reason: impl Into<String>, source: Error) -> Self {
		Self::UiRequired { reason: reason.into(), source: Some(Box::new(source)) }
	}

	/// Returns the server-supplied OAuth error code when this is an endpoint error.
	pub fn service_error_code(&self) -> Option<&str> {
		match self {
			Self::Service(err) => err.error_code(),
			_ => None,
		}
	}

	/// Returns `true` when the token endpoint answered `invalid_grant`.
	pub fn is_invalid_grant(&self) -> bool {
		self.service_error_code().is_some_and(|code| code.eq_ignore_ascii_case("invalid_grant"))
	}

	/// Returns `true` for [`Error::UiRequired`].
	pub fn is_ui_required(&self) -> bool {
		matches!(self, Self::UiRequired { .. })
	}

	/// Returns `true` when the service stayed unreachable after the transient retry.
	pub fn is_service_unavailable(&self) -> bool {
		matches!(
			self,
			Self::Service(
				ServiceError::RequestTimeout { .. } | ServiceError::ServiceNotAvailable { .. }
			)
		)
	}
}

/// Malformed caller input.
#[derive(Debug, ThisError)]
pub enum ArgumentError {
	/// Authority string is not an `https` URL with a non-empty path.
	#[error("Authority `{authority}` is invalid: {reason}.")]
	InvalidAuthority {
		/// Authority string supplied by the caller.
		authority: String,
		/// Validation rule that failed.
		reason: &'static str,
	},
	/// No scopes were requested.
	#[error("At least one scope must be requested.")]
	EmptyScopes,
	/// A scope entry failed validation.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// Callers cannot request scopes the library always sends.
	#[error("Scope `{scope}` is reserved and added automatically.")]
	ReservedScope {
		/// Offending scope.
		scope: String,
	},
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// A cache key component was empty.
	#[error("Cache key component `{component}` cannot be empty.")]
	EmptyKeyComponent {
		/// Name of the component (authority, client id).
		component: &'static str,
	},
	/// Operation requires an explicit user.
	#[error("The {operation} operation requires a user.")]
	MissingUser {
		/// Operation that required the user.
		operation: &'static str,
	},
	/// Authority validation is not available for this authority type.
	#[error("Authority validation is not supported for `{authority}`.")]
	UnsupportedValidation {
		/// Authority string that cannot be validated.
		authority: String,
	},
	/// ADFS validation needs the user's domain.
	#[error("Validating ADFS authority `{authority}` requires a login hint with a domain.")]
	MissingDomainHint {
		/// ADFS authority that required the hint.
		authority: String,
	},
}

/// Failures reported by (or while talking to) identity endpoints.
#[derive(Debug, ThisError)]
pub enum ServiceError {
	/// Endpoint answered with a structured OAuth error.
	#[error("The {endpoint} endpoint returned `{error_code}`.")]
	Endpoint {
		/// Endpoint that produced the error.
		endpoint: Endpoint,
		/// HTTP status code, absent for redirect-delivered errors.
		status: Option<u16>,
		/// OAuth `error` field.
		error_code: String,
		/// OAuth `error_description` field.
		description: Option<String>,
		/// Numeric `error_codes` returned by Azure AD.
		error_codes: Vec<u64>,
	},
	/// The request timed out on both the initial attempt and the retry.
	#[error("Request to the {endpoint} endpoint timed out.")]
	RequestTimeout {
		/// Endpoint that timed out.
		endpoint: Endpoint,
		/// Transport failure observed on the final attempt.
		#[source]
		source: TransportError,
	},
	/// The endpoint answered 500/503/504 on both the initial attempt and the retry.
	#[error("The {endpoint} endpoint is not available (HTTP {status}).")]
	ServiceNotAvailable {
		/// Endpoint that was unavailable.
		endpoint: Endpoint,
		/// Final HTTP status code.
		status: u16,
	},
	/// WebFinger did not list the authority as a trusted realm.
	#[error("Authority `{authority}` is not trusted by its identity provider.")]
	UntrustedAuthority {
		/// Authority that failed validation.
		authority: String,
	},
}
impl ServiceError {
	/// Returns the OAuth `error` code for endpoint errors.
	pub fn error_code(&self) -> Option<&str> {
		match self {
			Self::Endpoint { error_code, .. } => Some(error_code),
			_ => None,
		}
	}
}

/// Local failures that are never retried.
#[derive(Debug, ThisError)]
pub enum ClientError {
	/// An endpoint responded with a body that could not be parsed.
	#[error("The {endpoint} endpoint returned malformed JSON.")]
	JsonParse {
		/// Endpoint that produced the body.
		endpoint: Endpoint,
		/// HTTP status code of the response.
		status: u16,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Transport failure (DNS, TCP, TLS, IO).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token endpoint succeeded but omitted a required field.
	#[error("Token response is missing `{field}`.")]
	InvalidTokenResponse {
		/// Missing field.
		field: &'static str,
	},
	/// ID token could not be decoded.
	#[error("ID token is malformed: {reason}.")]
	MalformedIdToken {
		/// Decoding failure.
		reason: String,
	},
	/// Client info could not be decoded.
	#[error("Client info is malformed: {reason}.")]
	MalformedClientInfo {
		/// Decoding failure.
		reason: String,
	},
	/// Authorization redirect carried an unexpected `state`.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// Authorization redirect carried neither a code nor an error.
	#[error("Authorization redirect is malformed: {reason}.")]
	MalformedRedirect {
		/// What was missing.
		reason: &'static str,
	},
	/// Broker IPC failed to connect, bind, or answer.
	#[error("Broker communication over {transport} failed.")]
	BrokerCommunication {
		/// Transport used for the call.
		transport: BrokerTransportKind,
		/// Collaborator-specific cause.
		#[source]
		source: BoxError,
	},
	/// Broker IPC exceeded the configured bound.
	#[error("Broker did not answer over {transport} within {timeout}.")]
	BrokerTimeout {
		/// Transport used for the call.
		transport: BrokerTransportKind,
		/// Configured bound.
		timeout: Duration,
	},
	/// Broker answered with a bundle missing required fields.
	#[error("Broker result is missing `{field}`.")]
	MalformedBrokerResult {
		/// Missing field.
		field: &'static str,
	},
	/// Command execution aborted unexpectedly (panic or runtime shutdown).
	#[error("Command execution aborted: {message}.")]
	Internal {
		/// Abort description.
		message: String,
	},
	/// The dispatcher no longer accepts commands.
	#[error("Command dispatcher is shut down.")]
	DispatcherClosed,
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A configuration field holds an unusable value.
	#[error("Configuration field `{field}` is invalid: {reason}.")]
	InvalidField {
		/// Field name.
		field: &'static str,
		/// Validation rule that failed.
		reason: String,
	},
	/// A configured URL could not be parsed or joined.
	#[error("Configuration field `{field}` holds an invalid URL.")]
	InvalidUrl {
		/// Field name.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Dispatch requires a Tokio runtime.
	#[error("No Tokio runtime is available to host the command dispatcher.")]
	MissingRuntime,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Request exceeded the transport's timeout.
	#[error("Request timed out.")]
	Timeout {
		/// Transport-specific timeout error.
		#[source]
		source: BoxError,
	},
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred.")]
	Io(#[from] std::io::Error),
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	Request(#[from] oauth2::http::Error),
	/// Transport reported a failure without a structured cause.
	#[error("HTTP client error: {message}.")]
	Other {
		/// Transport-supplied description.
		message: String,
	},
}
impl TransportError {
	/// Wraps a transport-specific timeout.
	pub fn timeout(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Timeout { source: Box::new(src) }
	}

	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}

	/// Returns `true` for timeouts, the only transport failure that is retried.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::timeout(e) } else { Self::network(e) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn ui_required_preserves_service_cause() {
		let service = ServiceError::Endpoint {
			endpoint: Endpoint::Token,
			status: Some(400),
			error_code: "invalid_request".into(),
			description: None,
			error_codes: vec![],
		};
		let err = Error::ui_required_with("refresh failed", service.into());

		assert!(err.is_ui_required());

		let source = StdError::source(&err).expect("UiRequired should expose its cause.");

		assert!(source.to_string().contains("invalid_request"));
	}

	#[test]
	fn invalid_grant_is_detected_case_insensitively() {
		let err: Error = ServiceError::Endpoint {
			endpoint: Endpoint::Token,
			status: Some(400),
			error_code: "INVALID_GRANT".into(),
			description: None,
			error_codes: vec![70000],
		}
		.into();

		assert!(err.is_invalid_grant());
		assert_eq!(err.service_error_code(), Some("INVALID_GRANT"));
		assert!(!err.is_service_unavailable());
	}
}
