//! Application configuration with named optional fields.
//!
//! [`PublicClientConfig`] deserializes from any serde format; omitted fields take the
//! defaults below. Every application constructor calls [`PublicClientConfig::validate`], so an
//! application never runs with an unusable configuration.

// self
use crate::{
	_prelude::*,
	auth::ClientId,
	authority::{
		Authority,
		resolver::{
			DEFAULT_DRS_CLOUD_ENDPOINT, DEFAULT_INSTANCE_DISCOVERY_ENDPOINT, DiscoveryEndpoints,
		},
	},
	broker::{Audience, BrokerPolicy},
	error::ConfigError,
};

/// Authority used when a request names none.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";
/// Largest accepted `token_expiration_buffer_secs`.
pub const MAX_EXPIRATION_BUFFER_SECS: u64 = 24 * 60 * 60;

/// Public client application settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicClientConfig {
	/// Application (client) id.
	pub client_id: ClientId,
	/// Redirect URI; HTTPS or a custom scheme.
	pub redirect_uri: Url,
	/// Default authority for requests.
	#[serde(default = "default_authority")]
	pub authority: String,
	/// Validate authorities through instance discovery or DRS + WebFinger.
	#[serde(default = "default_true")]
	pub validate_authority: bool,
	/// Registered audience, an input to broker eligibility.
	#[serde(default)]
	pub audience: Audience,
	/// Opt into broker use.
	#[serde(default)]
	pub broker_enabled: bool,
	/// Access tokens expiring within this many seconds count as expired.
	#[serde(default = "default_expiration_buffer_secs")]
	pub token_expiration_buffer_secs: u64,
	/// Serve tokens inside their extended lifetime while the service is unavailable.
	#[serde(default)]
	pub extended_lifetime_enabled: bool,
	/// Request timeout of the default transport.
	#[serde(default = "default_http_timeout_secs")]
	pub http_timeout_secs: u64,
	/// Pause before the single transient retry.
	#[serde(default = "default_http_retry_delay_ms")]
	pub http_retry_delay_ms: u64,
	/// Upper bound on one broker IPC call.
	#[serde(default = "default_broker_timeout_secs")]
	pub broker_timeout_secs: u64,
	/// Silent requests executing at once.
	#[serde(default = "default_max_concurrent_silent")]
	pub max_concurrent_silent: usize,
	/// AAD instance-discovery endpoint.
	#[serde(default = "default_instance_discovery_endpoint")]
	pub instance_discovery_endpoint: String,
	/// Cloud DRS root used for ADFS validation.
	#[serde(default = "default_drs_cloud_endpoint")]
	pub drs_cloud_endpoint: String,
}
impl PublicClientConfig {
	/// Configuration with every optional field at its default.
	pub fn new(client_id: ClientId, redirect_uri: Url) -> Self {
		Self {
			client_id,
			redirect_uri,
			authority: default_authority(),
			validate_authority: true,
			audience: Audience::default(),
			broker_enabled: false,
			token_expiration_buffer_secs: default_expiration_buffer_secs(),
			extended_lifetime_enabled: false,
			http_timeout_secs: default_http_timeout_secs(),
			http_retry_delay_ms: default_http_retry_delay_ms(),
			broker_timeout_secs: default_broker_timeout_secs(),
			max_concurrent_silent: default_max_concurrent_silent(),
			instance_discovery_endpoint: default_instance_discovery_endpoint(),
			drs_cloud_endpoint: default_drs_cloud_endpoint(),
		}
	}

	/// Checks every field.
	pub fn validate(&self) -> Result<()> {
		self.default_authority()?;
		self.discovery_endpoints()?;

		if self.redirect_uri.scheme() == "http" {
			return Err(invalid("redirect_uri", "plain http redirects are not allowed").into());
		}
		if self.http_timeout_secs == 0 {
			return Err(invalid("http_timeout_secs", "must be positive").into());
		}
		if self.broker_timeout_secs == 0 {
			return Err(invalid("broker_timeout_secs", "must be positive").into());
		}
		if self.max_concurrent_silent == 0 {
			return Err(invalid("max_concurrent_silent", "must be positive").into());
		}
		if self.token_expiration_buffer_secs > MAX_EXPIRATION_BUFFER_SECS {
			return Err(invalid("token_expiration_buffer_secs", "must not exceed one day").into());
		}

		Ok(())
	}

	/// Parsed default authority.
	pub fn default_authority(&self) -> Result<Authority> {
		Ok(Authority::parse(&self.authority)?)
	}

	/// Parsed discovery endpoints.
	pub fn discovery_endpoints(&self) -> Result<DiscoveryEndpoints, ConfigError> {
		DiscoveryEndpoints::parse(&self.instance_discovery_endpoint, &self.drs_cloud_endpoint)
	}

	/// Broker settings.
	pub fn broker_policy(&self) -> BrokerPolicy {
		BrokerPolicy { enabled: self.broker_enabled, audience: self.audience }
	}

	/// Expiration buffer as a duration.
	pub fn expiration_buffer(&self) -> Duration {
		Duration::seconds(self.token_expiration_buffer_secs.min(MAX_EXPIRATION_BUFFER_SECS) as i64)
	}

	/// Transport request timeout.
	pub fn http_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.http_timeout_secs)
	}

	/// Pause before the transient retry.
	pub fn http_retry_delay(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.http_retry_delay_ms)
	}

	/// Broker IPC bound.
	pub fn broker_timeout(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.broker_timeout_secs)
	}
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
	ConfigError::InvalidField { field, reason: reason.into() }
}

fn default_authority() -> String {
	DEFAULT_AUTHORITY.into()
}

fn default_true() -> bool {
	true
}

fn default_expiration_buffer_secs() -> u64 {
	300
}

fn default_http_timeout_secs() -> u64 {
	30
}

fn default_http_retry_delay_ms() -> u64 {
	1_000
}

fn default_broker_timeout_secs() -> u64 {
	30
}

fn default_max_concurrent_silent() -> usize {
	8
}

fn default_instance_discovery_endpoint() -> String {
	DEFAULT_INSTANCE_DISCOVERY_ENDPOINT.into()
}

fn default_drs_cloud_endpoint() -> String {
	DEFAULT_DRS_CLOUD_ENDPOINT.into()
}
