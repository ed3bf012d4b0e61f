//! Authority parsing, classification, and endpoint resolution.
//!
//! An [`Authority`] is the parsed, canonical form of a caller-supplied URL. Resolution turns
//! it into [`AuthorityEndpoints`] through two network phases (a first phase that yields the
//! tenant-discovery document URL, then tenant discovery itself); see [`AuthorityResolver`].

pub mod adfs;
pub mod registry;
pub mod resolver;

pub use registry::AuthorityRegistry;
pub use resolver::{AuthorityResolver, DiscoveryEndpoints, ResolutionState};

// self
use crate::{_prelude::*, error::ArgumentError};

/// Hosts whose instance metadata is trusted without an instance-discovery round trip.
pub const TRUSTED_HOSTS: [&str; 6] = [
	"login.windows.net",
	"login.microsoftonline.com",
	"login.chinacloudapi.cn",
	"login.microsoftonline.de",
	"login-us.microsoftonline.com",
	"login.microsoftonline.us",
];

/// Tenant segments that address more than one tenant.
pub const TENANTLESS_SEGMENTS: [&str; 3] = ["common", "organizations", "consumers"];

const ADFS_SEGMENT: &str = "adfs";
const B2C_SEGMENT: &str = "tfp";

/// Identity provider family behind an authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthorityKind {
	/// Azure AD (`https://host/<tenant>`).
	Aad,
	/// Active Directory Federation Services (`https://host/adfs`).
	Adfs,
	/// Azure AD B2C (`https://host/tfp/<tenant>/<policy>`).
	B2c,
}

/// Parsed authority URL.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Authority {
	canonical: String,
	host: String,
	kind: AuthorityKind,
	tenant: Option<String>,
	policy: Option<String>,
}
impl Authority {
	/// Parses and canonicalizes an authority string.
	///
	/// The result is lowercase without a trailing slash; AAD authorities keep only the tenant
	/// segment.
	pub fn parse(raw: &str) -> Result<Self, ArgumentError> {
		let invalid = |reason: &'static str| ArgumentError::InvalidAuthority {
			authority: raw.to_owned(),
			reason,
		};
		let url = Url::parse(raw.trim()).map_err(|_| invalid("not a valid URL"))?;

		if url.scheme() != "https" {
			return Err(invalid("the scheme must be https"));
		}
		if url.query().is_some() || url.fragment().is_some() {
			return Err(invalid("query strings and fragments are not allowed"));
		}

		let host = match (url.host_str(), url.port()) {
			(Some(host), Some(port)) => format!("{}:{port}", host.to_ascii_lowercase()),
			(Some(host), None) => host.to_ascii_lowercase(),
			(None, _) => return Err(invalid("a host is required")),
		};
		let segments = url
			.path_segments()
			.map(|segments| {
				segments
					.filter(|segment| !segment.is_empty())
					.map(str::to_ascii_lowercase)
					.collect::<Vec<_>>()
			})
			.unwrap_or_default();
		let Some(first) = segments.first() else {
			return Err(invalid("the path must name a tenant"));
		};
		let (kind, tenant, policy, path) = match first.as_str() {
			ADFS_SEGMENT => (AuthorityKind::Adfs, None, None, ADFS_SEGMENT.to_owned()),
			B2C_SEGMENT => {
				let (Some(tenant), Some(policy)) = (segments.get(1), segments.get(2)) else {
					return Err(invalid("B2C authorities must be tfp/<tenant>/<policy>"));
				};

				(
					AuthorityKind::B2c,
					Some(tenant.clone()),
					Some(policy.clone()),
					format!("{B2C_SEGMENT}/{tenant}/{policy}"),
				)
			},
			tenant => (AuthorityKind::Aad, Some(tenant.to_owned()), None, tenant.to_owned()),
		};

		Ok(Self { canonical: format!("https://{host}/{path}"), host, kind, tenant, policy })
	}

	/// Canonical authority string.
	pub fn as_str(&self) -> &str {
		&self.canonical
	}

	/// Lowercased host (with port when non-default).
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Provider family.
	pub fn kind(&self) -> AuthorityKind {
		self.kind
	}

	/// Tenant segment; `None` for ADFS.
	pub fn tenant(&self) -> Option<&str> {
		self.tenant.as_deref()
	}

	/// B2C policy.
	pub fn policy(&self) -> Option<&str> {
		self.policy.as_deref()
	}

	/// Returns `true` for `common`, `organizations`, and `consumers` AAD authorities.
	pub fn is_tenantless(&self) -> bool {
		self.kind == AuthorityKind::Aad
			&& self.tenant.as_deref().is_some_and(|tenant| TENANTLESS_SEGMENTS.contains(&tenant))
	}

	/// Returns `true` when the host is on the trusted cloud list.
	pub fn is_trusted_host(&self) -> bool {
		TRUSTED_HOSTS.contains(&self.host.as_str())
	}

	/// `https://<host>`.
	pub fn root(&self) -> String {
		format!("https://{}", self.host)
	}

	/// Authorization endpoint used as the instance-discovery probe.
	pub fn default_authorize_endpoint(&self) -> String {
		format!("{}/oauth2/v2.0/authorize", self.canonical)
	}

	/// OpenID configuration document location.
	pub fn default_tenant_discovery_endpoint(&self) -> String {
		match self.kind {
			AuthorityKind::Adfs => format!("{}/.well-known/openid-configuration", self.canonical),
			AuthorityKind::Aad | AuthorityKind::B2c =>
				format!("{}/v2.0/.well-known/openid-configuration", self.canonical),
		}
	}
}
impl Display for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.canonical)
	}
}
impl FromStr for Authority {
	type Err = ArgumentError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

/// Endpoints published by an authority's OpenID configuration document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEndpoints {
	/// Authorization endpoint.
	pub authorization_endpoint: Url,
	/// Token endpoint.
	pub token_endpoint: Url,
	/// Issuer.
	#[serde(default)]
	pub issuer: Option<String>,
}

/// An authority paired with its resolved endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedAuthority {
	/// Parsed authority.
	pub authority: Authority,
	/// Endpoints, immutable once resolved.
	pub endpoints: AuthorityEndpoints,
}
