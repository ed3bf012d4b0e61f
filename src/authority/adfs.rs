//! ADFS validation: device registration (DRS) lookup followed by a WebFinger realm check.

// self
use crate::{
	_prelude::*,
	authority::Authority,
	error::{ConfigError, ServiceError},
	http::{Endpoint, HttpExecutor, PreparedRequest, TokenHttpClient, TransportErrorMapper},
	obs,
};

/// WebFinger relation that marks a realm as trusted by the federation service.
pub const TRUSTED_REALM_REL: &str = "http://schemas.microsoft.com/rel/trusted-realm";
const DRS_PATH: &str = "enrollmentserver/contract?api-version=1.0";

/// Device registration metadata.
#[derive(Clone, Debug, Deserialize)]
pub struct DrsMetadata {
	/// Federation service description.
	#[serde(rename = "IdentityProviderService")]
	pub identity_provider_service: IdentityProviderService,
}

/// `IdentityProviderService` section of the DRS document.
#[derive(Clone, Debug, Deserialize)]
pub struct IdentityProviderService {
	/// Passive authentication endpoint of the federation server.
	#[serde(rename = "PassiveAuthEndpoint")]
	pub passive_auth_endpoint: Url,
}

/// WebFinger answer.
#[derive(Clone, Debug, Deserialize)]
pub struct WebFingerMetadata {
	/// Subject the document describes.
	#[serde(default)]
	pub subject: Option<String>,
	/// Advertised links.
	#[serde(default)]
	pub links: Vec<WebFingerLink>,
}
impl WebFingerMetadata {
	/// Returns `true` when a trusted-realm link points at `authority`'s root.
	pub fn trusts(&self, authority: &Authority) -> bool {
		let root = authority.root();

		self.links.iter().any(|link| {
			link.rel == TRUSTED_REALM_REL
				&& link.href.trim_end_matches('/').eq_ignore_ascii_case(&root)
		})
	}
}

/// Single WebFinger link.
#[derive(Clone, Debug, Deserialize)]
pub struct WebFingerLink {
	/// Relation type.
	pub rel: String,
	/// Target.
	pub href: String,
}

/// Extracts the domain from a UPN-style login hint.
pub fn domain_from_login_hint(login_hint: &str) -> Option<&str> {
	let (_, domain) = login_hint.trim().rsplit_once('@')?;

	(!domain.is_empty()).then_some(domain)
}

/// On-premises DRS URL for `domain`.
pub fn on_premises_drs_url(domain: &str) -> Result<Url, ConfigError> {
	let domain = domain.to_ascii_lowercase();

	Url::parse(&format!("https://enterpriseregistration.{domain}/{DRS_PATH}"))
		.map_err(|source| ConfigError::InvalidUrl { field: "login_hint", source })
}

/// Cloud DRS URL for `domain`, rooted at `cloud_base`.
pub fn cloud_drs_url(cloud_base: &Url, domain: &str) -> Result<Url, ConfigError> {
	cloud_base
		.join(&format!("{}/{DRS_PATH}", domain.to_ascii_lowercase()))
		.map_err(|source| ConfigError::InvalidUrl { field: "drs_cloud_endpoint", source })
}

/// WebFinger URL on the federation server's host, asking about `authority`.
pub fn webfinger_url(
	passive_auth_endpoint: &Url,
	authority: &Authority,
) -> Result<Url, ConfigError> {
	let mut url = passive_auth_endpoint
		.join("/.well-known/webfinger")
		.map_err(|source| ConfigError::InvalidUrl { field: "PassiveAuthEndpoint", source })?;

	url.query_pairs_mut()
		.append_pair("resource", &authority.root())
		.append_pair("rel", TRUSTED_REALM_REL);

	Ok(url)
}

/// Queries DRS on premises first and falls back to the cloud service.
pub async fn discover_drs<C, M>(
	executor: &HttpExecutor<C, M>,
	cloud_base: &Url,
	domain: &str,
	correlation_id: Uuid,
) -> Result<DrsMetadata>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let on_premises =
		PreparedRequest::get(on_premises_drs_url(domain)?).with_correlation_id(correlation_id);

	match executor.get_json(Endpoint::DeviceRegistration, &on_premises).await {
		Ok(metadata) => return Ok(metadata),
		Err(e) => obs::debug(format_args!("On-premises DRS lookup for {domain} failed: {e}")),
	}

	let cloud = PreparedRequest::get(cloud_drs_url(cloud_base, domain)?)
		.with_correlation_id(correlation_id);

	executor.get_json(Endpoint::DeviceRegistration, &cloud).await
}

/// Confirms through WebFinger that the federation server trusts `authority`.
pub async fn verify_trusted_realm<C, M>(
	executor: &HttpExecutor<C, M>,
	drs: &DrsMetadata,
	authority: &Authority,
	correlation_id: Uuid,
) -> Result<()>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let url = webfinger_url(&drs.identity_provider_service.passive_auth_endpoint, authority)?;
	let request = PreparedRequest::get(url).with_correlation_id(correlation_id);
	let metadata: WebFingerMetadata = executor.get_json(Endpoint::WebFinger, &request).await?;

	if metadata.trusts(authority) {
		Ok(())
	} else {
		Err(ServiceError::UntrustedAuthority { authority: authority.to_string() }.into())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn authority() -> Authority {
		Authority::parse("https://fs.contoso.com/adfs").expect("Authority fixture is valid.")
	}

	#[test]
	fn login_hint_domain() {
		assert_eq!(domain_from_login_hint("ada@Contoso.com"), Some("Contoso.com"));
		assert_eq!(domain_from_login_hint("ada"), None);
		assert_eq!(domain_from_login_hint("ada@"), None);
	}

	#[test]
	fn drs_urls() {
		let cloud =
			Url::parse("https://enterpriseregistration.windows.net/").expect("URL is valid.");

		assert_eq!(
			on_premises_drs_url("Contoso.com").expect("URL should build.").as_str(),
			"https://enterpriseregistration.contoso.com/enrollmentserver/contract?api-version=1.0"
		);
		assert_eq!(
			cloud_drs_url(&cloud, "contoso.com").expect("URL should build.").as_str(),
			"https://enterpriseregistration.windows.net/contoso.com/enrollmentserver/contract?api-version=1.0"
		);
	}

	#[test]
	fn webfinger_url_targets_passive_host() {
		let passive = Url::parse("https://sts.contoso.com/adfs/ls").expect("URL is valid.");
		let url = webfinger_url(&passive, &authority()).expect("URL should build.");

		assert_eq!(url.host_str(), Some("sts.contoso.com"));
		assert_eq!(url.path(), "/.well-known/webfinger");
		assert!(url.query_pairs().any(|(k, v)| k == "resource" && v == "https://fs.contoso.com"));
	}

	#[test]
	fn trusted_realm_requires_matching_link() {
		let metadata: WebFingerMetadata = serde_json::from_str(&format!(
			r#"{{"subject":"https://fs.contoso.com","links":[{{"rel":"{TRUSTED_REALM_REL}","href":"https://FS.contoso.com/"}}]}}"#
		))
		.expect("WebFinger fixture should parse.");
		let other = Authority::parse("https://fs.fabrikam.com/adfs").expect("Authority is valid.");

		assert!(metadata.trusts(&authority()));
		assert!(!metadata.trusts(&other));
	}
}
