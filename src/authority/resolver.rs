//! Two-phase authority resolution.
//!
//! ```text
//! Unvalidated --first phase--> TenantDiscoveryPending --tenant discovery--> Resolved
//!      \_____________________________\___________________________________> Unresolvable
//! ```
//!
//! The first phase depends on the provider family:
//!
//! - AAD on a trusted host, or with validation off: the tenant-discovery URL is derived locally.
//! - AAD otherwise: instance discovery returns the tenant-discovery URL.
//! - ADFS with validation: DRS + WebFinger must vouch for the authority first.
//! - B2C: derived locally; validation is only possible on trusted hosts.

// self
use crate::{
	_prelude::*,
	authority::{
		Authority, AuthorityEndpoints, AuthorityKind, AuthorityRegistry, ResolvedAuthority, adfs,
	},
	error::{ArgumentError, ConfigError},
	http::{Endpoint, HttpExecutor, PreparedRequest, TokenHttpClient, TransportErrorMapper},
	obs::{self, FlowKind, FlowSpan},
};

/// Default AAD instance-discovery endpoint.
pub const DEFAULT_INSTANCE_DISCOVERY_ENDPOINT: &str =
	"https://login.microsoftonline.com/common/discovery/instance";
/// Default cloud DRS root.
pub const DEFAULT_DRS_CLOUD_ENDPOINT: &str = "https://enterpriseregistration.windows.net/";
const INSTANCE_DISCOVERY_API_VERSION: &str = "1.1";

/// Where resolution is in its lifecycle.
#[derive(Debug)]
pub enum ResolutionState {
	/// Nothing has been checked yet.
	Unvalidated,
	/// The first phase produced the tenant-discovery document URL.
	TenantDiscoveryPending {
		/// OpenID configuration URL.
		tenant_discovery_endpoint: Url,
	},
	/// Endpoints are known.
	Resolved(AuthorityEndpoints),
	/// A phase failed with the carried error.
	Unresolvable(Error),
}
impl ResolutionState {
	/// Stable label for logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Unvalidated => "unvalidated",
			Self::TenantDiscoveryPending { .. } => "tenant_discovery_pending",
			Self::Resolved(_) => "resolved",
			Self::Unresolvable(_) => "unresolvable",
		}
	}
}

/// Network endpoints used by the first phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryEndpoints {
	/// AAD instance-discovery endpoint.
	pub instance_discovery: Url,
	/// Cloud DRS root for ADFS.
	pub drs_cloud: Url,
}
impl DiscoveryEndpoints {
	/// Parses both endpoints.
	pub fn parse(instance_discovery: &str, drs_cloud: &str) -> Result<Self, ConfigError> {
		Ok(Self {
			instance_discovery: Url::parse(instance_discovery).map_err(|source| {
				ConfigError::InvalidUrl { field: "instance_discovery_endpoint", source }
			})?,
			drs_cloud: Url::parse(drs_cloud)
				.map_err(|source| ConfigError::InvalidUrl { field: "drs_cloud_endpoint", source })?,
		})
	}
}

#[derive(Deserialize)]
struct InstanceDiscoveryResponse {
	tenant_discovery_endpoint: Url,
}

/// Resolves authorities into endpoints, memoizing results in an owned registry.
pub struct AuthorityResolver<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	executor: HttpExecutor<C, M>,
	registry: Arc<AuthorityRegistry>,
	discovery: DiscoveryEndpoints,
}
impl<C, M> AuthorityResolver<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a resolver.
	pub fn new(
		executor: HttpExecutor<C, M>,
		registry: Arc<AuthorityRegistry>,
		discovery: DiscoveryEndpoints,
	) -> Self {
		Self { executor, registry, discovery }
	}

	/// Registry backing this resolver.
	pub fn registry(&self) -> &Arc<AuthorityRegistry> {
		&self.registry
	}

	/// Resolves `authority`, consulting the registry first.
	///
	/// `login_hint` supplies the domain ADFS validation needs.
	pub async fn resolve(
		&self,
		authority: &Authority,
		validate: bool,
		login_hint: Option<&str>,
		correlation_id: Uuid,
	) -> Result<ResolvedAuthority> {
		if let Some(endpoints) = self.registry.get(authority.as_str()) {
			return Ok(ResolvedAuthority { authority: authority.clone(), endpoints });
		}

		let mut state = ResolutionState::Unvalidated;

		loop {
			state = match state {
				ResolutionState::Unvalidated =>
					match self.first_phase(authority, validate, login_hint, correlation_id).await {
						Ok(tenant_discovery_endpoint) =>
							ResolutionState::TenantDiscoveryPending { tenant_discovery_endpoint },
						Err(e) => ResolutionState::Unresolvable(e),
					},
				ResolutionState::TenantDiscoveryPending { tenant_discovery_endpoint } =>
					match self.resolve_endpoints(&tenant_discovery_endpoint, correlation_id).await {
						Ok(endpoints) => ResolutionState::Resolved(endpoints),
						Err(e) => ResolutionState::Unresolvable(e),
					},
				ResolutionState::Resolved(endpoints) => {
					let endpoints = self.registry.insert(authority.as_str(), endpoints);

					return Ok(ResolvedAuthority { authority: authority.clone(), endpoints });
				},
				ResolutionState::Unresolvable(e) => {
					obs::warn(format_args!("Authority {authority} is unresolvable: {e}"));

					return Err(e);
				},
			};

			obs::debug(format_args!("Authority {authority} is now {}", state.as_str()));
		}
	}

	/// Asks the instance-discovery endpoint for `authority`'s tenant-discovery URL.
	///
	/// A 4xx answer (for example `invalid_instance`) surfaces as a service error without retry.
	pub async fn perform_instance_discovery(
		&self,
		authority: &Authority,
		correlation_id: Uuid,
	) -> Result<Url> {
		let span = FlowSpan::new(FlowKind::InstanceDiscovery, "perform_instance_discovery")
			.with_correlation_id(correlation_id);

		let result = span
			.instrument(async {
				let mut url = self.discovery.instance_discovery.clone();

				url.query_pairs_mut()
					.append_pair("api-version", INSTANCE_DISCOVERY_API_VERSION)
					.append_pair("authorization_endpoint", &authority.default_authorize_endpoint());

				let request = PreparedRequest::get(url).with_correlation_id(correlation_id);

				self.executor
					.get_json::<InstanceDiscoveryResponse>(Endpoint::InstanceDiscovery, &request)
					.await
					.map(|response| response.tenant_discovery_endpoint)
			})
			.await;

		span.finish_with(&result);

		result
	}

	/// Fetches the OpenID configuration document.
	pub async fn resolve_endpoints(
		&self,
		tenant_discovery_endpoint: &Url,
		correlation_id: Uuid,
	) -> Result<AuthorityEndpoints> {
		let span = FlowSpan::new(FlowKind::TenantDiscovery, "resolve_endpoints")
			.with_correlation_id(correlation_id);

		let request = PreparedRequest::get(tenant_discovery_endpoint.clone())
			.with_correlation_id(correlation_id);
		let result =
			span.instrument(self.executor.get_json(Endpoint::TenantDiscovery, &request)).await;

		span.finish_with(&result);

		result
	}

	async fn first_phase(
		&self,
		authority: &Authority,
		validate: bool,
		login_hint: Option<&str>,
		correlation_id: Uuid,
	) -> Result<Url> {
		match authority.kind() {
			AuthorityKind::Aad if validate && !authority.is_trusted_host() =>
				self.perform_instance_discovery(authority, correlation_id).await,
			AuthorityKind::Aad => default_tenant_discovery(authority),
			AuthorityKind::B2c if validate && !authority.is_trusted_host() => {
				let authority = authority.to_string();

				Err(ArgumentError::UnsupportedValidation { authority }.into())
			},
			AuthorityKind::B2c => default_tenant_discovery(authority),
			AuthorityKind::Adfs if validate => {
				let domain = login_hint.and_then(adfs::domain_from_login_hint).ok_or_else(|| {
					ArgumentError::MissingDomainHint { authority: authority.to_string() }
				})?;
				let span = FlowSpan::new(FlowKind::AdfsDiscovery, "validate_adfs")
					.with_correlation_id(correlation_id);

				let validated = span
					.instrument(async {
						let drs = adfs::discover_drs(
							&self.executor,
							&self.discovery.drs_cloud,
							domain,
							correlation_id,
						)
						.await?;

						adfs::verify_trusted_realm(&self.executor, &drs, authority, correlation_id)
							.await
					})
					.await;

				span.finish_with(&validated);
				validated?;

				default_tenant_discovery(authority)
			},
			AuthorityKind::Adfs => default_tenant_discovery(authority),
		}
	}
}
impl<C, M> Debug for AuthorityResolver<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorityResolver")
			.field("discovery", &self.discovery)
			.field("resolved", &self.registry.len())
			.finish()
	}
}

fn default_tenant_discovery(authority: &Authority) -> Result<Url> {
	Url::parse(&authority.default_tenant_discovery_endpoint()).map_err(|_| {
		ArgumentError::InvalidAuthority { authority: authority.to_string(), reason: "unusable URL" }
			.into()
	})
}
