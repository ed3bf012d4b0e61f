//! Broker eligibility and IPC transport selection.
//!
//! A broker is a separate, signature-verified app that acquires tokens on the caller's behalf.
//! Whether a request may use it is decided once, before dispatch, by
//! [`select_broker_transport`]: the app must opt in, the authority must be Azure AD, the
//! audience must include work or school accounts, and an installed broker must expose at least
//! one working transport. Transports are preferred in [`TRANSPORT_PREFERENCE`] order and a
//! failure on the chosen transport is reported, never retried on another one.

pub mod bundle;

pub use bundle::*;

// self
use crate::{
	_prelude::*,
	authority::{Authority, AuthorityKind},
	error::BoxError,
};

/// Transports in the order they are preferred.
pub const TRANSPORT_PREFERENCE: [BrokerTransportKind; 3] = [
	BrokerTransportKind::BoundService,
	BrokerTransportKind::ContentProvider,
	BrokerTransportKind::AccountManager,
];

/// Boxed future returned by [`BrokerTransport::send`].
pub type BrokerFuture<'a> =
	Pin<Box<dyn Future<Output = Result<BrokerBundle, BoxError>> + 'a + Send>>;

/// IPC channel variants a broker may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerTransportKind {
	/// Bound authentication service.
	BoundService,
	/// Content provider query.
	ContentProvider,
	/// Account manager `addAccount` / `getAuthToken`.
	AccountManager,
}
impl BrokerTransportKind {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::BoundService => "bound_service",
			Self::ContentProvider => "content_provider",
			Self::AccountManager => "account_manager",
		}
	}

	fn rank(self) -> usize {
		TRANSPORT_PREFERENCE.iter().position(|kind| *kind == self).unwrap_or(usize::MAX)
	}
}
impl Display for BrokerTransportKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Account types an app registration signs in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
	/// Accounts of a single organization.
	AzureAdMyOrg,
	/// Work or school accounts of any organization.
	AzureAdMultipleOrgs,
	/// Work or school accounts plus personal Microsoft accounts.
	#[default]
	AzureAdAndPersonalAccounts,
	/// Personal Microsoft accounts only.
	PersonalAccounts,
}

/// Operation requested from the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerOperation {
	/// Token from the broker's cache or a broker-side refresh.
	AcquireTokenSilent,
	/// Token through the broker's own UI.
	AcquireTokenInteractive,
}
impl BrokerOperation {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::AcquireTokenSilent => "acquire_token_silent",
			Self::AcquireTokenInteractive => "acquire_token_interactive",
		}
	}
}

/// One IPC channel into the broker.
pub trait BrokerTransport
where
	Self: Send + Sync,
{
	/// Channel variant.
	fn kind(&self) -> BrokerTransportKind;

	/// Returns `true` when the channel can be used right now (service bindable, permissions
	/// granted).
	fn is_available(&self) -> bool;

	/// Sends `request` and resolves with the broker's answer bundle.
	fn send<'a>(&'a self, operation: BrokerOperation, request: BrokerBundle) -> BrokerFuture<'a>;
}

/// Platform probe that reports the installed broker.
pub trait BrokerEnvironment
where
	Self: Send + Sync,
{
	/// The installed broker, if any.
	fn installed_broker(&self) -> Option<InstalledBroker>;
}

/// A broker found on the device.
#[derive(Clone)]
pub struct InstalledBroker {
	/// Package or bundle identifier.
	pub package_name: String,
	/// Whether the package signature matched a known broker certificate.
	pub signature_verified: bool,
	/// Transports the broker exposes.
	pub transports: Vec<Arc<dyn BrokerTransport>>,
}
impl Debug for InstalledBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let kinds = self.transports.iter().map(|transport| transport.kind()).collect::<Vec<_>>();

		f.debug_struct("InstalledBroker")
			.field("package_name", &self.package_name)
			.field("signature_verified", &self.signature_verified)
			.field("transports", &kinds)
			.finish()
	}
}

/// App-side broker settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BrokerPolicy {
	/// The app opted into broker use.
	pub enabled: bool,
	/// Registered audience.
	pub audience: Audience,
}

/// Why a request cannot use the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum BrokerIneligibility {
	/// The app did not opt in.
	#[error("the app has not enabled the broker")]
	NotEnabled,
	/// Only Azure AD authorities are brokered.
	#[error("the authority is not an Azure AD authority")]
	NonAadAuthority,
	/// The broker does not serve personal-account-only apps.
	#[error("the audience is personal accounts only")]
	PersonalAccountsOnly,
	/// No broker is installed.
	#[error("no broker is installed")]
	NotInstalled,
	/// The installed broker failed signature verification.
	#[error("the broker signature is not verified")]
	UnverifiedSignature,
	/// None of the broker's transports is usable.
	#[error("the broker exposes no usable transport")]
	NoUsableTransport,
}

/// Runs the eligibility checks and picks the preferred usable transport.
pub fn select_broker_transport(
	authority: &Authority,
	policy: &BrokerPolicy,
	environment: Option<&dyn BrokerEnvironment>,
) -> Result<Arc<dyn BrokerTransport>, BrokerIneligibility> {
	if !policy.enabled {
		return Err(BrokerIneligibility::NotEnabled);
	}
	if authority.kind() != AuthorityKind::Aad {
		return Err(BrokerIneligibility::NonAadAuthority);
	}
	if policy.audience == Audience::PersonalAccounts {
		return Err(BrokerIneligibility::PersonalAccountsOnly);
	}

	let broker = environment
		.and_then(|environment| environment.installed_broker())
		.ok_or(BrokerIneligibility::NotInstalled)?;

	if !broker.signature_verified {
		return Err(BrokerIneligibility::UnverifiedSignature);
	}

	broker
		.transports
		.into_iter()
		.filter(|transport| transport.is_available())
		.min_by_key(|transport| transport.kind().rank())
		.ok_or(BrokerIneligibility::NoUsableTransport)
}

/// Boolean form of [`select_broker_transport`].
pub fn broker_eligible(
	authority: &Authority,
	policy: &BrokerPolicy,
	environment: Option<&dyn BrokerEnvironment>,
) -> bool {
	select_broker_transport(authority, policy, environment).is_ok()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Probe(BrokerTransportKind, bool);
	impl BrokerTransport for Probe {
		fn kind(&self) -> BrokerTransportKind {
			self.0
		}

		fn is_available(&self) -> bool {
			self.1
		}

		fn send<'a>(&'a self, _: BrokerOperation, request: BrokerBundle) -> BrokerFuture<'a> {
			Box::pin(async move { Ok(request) })
		}
	}

	struct Device(Option<InstalledBroker>);
	impl BrokerEnvironment for Device {
		fn installed_broker(&self) -> Option<InstalledBroker> {
			self.0.clone()
		}
	}

	fn device(verified: bool, transports: &[(BrokerTransportKind, bool)]) -> Device {
		Device(Some(InstalledBroker {
			package_name: "com.azure.authenticator".into(),
			signature_verified: verified,
			transports: transports
				.iter()
				.map(|(kind, available)| {
					Arc::new(Probe(*kind, *available)) as Arc<dyn BrokerTransport>
				})
				.collect(),
		}))
	}

	fn aad() -> Authority {
		Authority::parse("https://login.microsoftonline.com/contoso.com")
			.expect("Authority fixture is valid.")
	}

	const ENABLED: BrokerPolicy = BrokerPolicy { enabled: true, audience: Audience::AzureAdMyOrg };

	fn reason(
		authority: &Authority,
		policy: &BrokerPolicy,
		environment: Option<&dyn BrokerEnvironment>,
	) -> Option<BrokerIneligibility> {
		select_broker_transport(authority, policy, environment).err()
	}

	#[test]
	fn prefers_bound_service_then_content_provider() {
		let all = device(
			true,
			&[
				(BrokerTransportKind::AccountManager, true),
				(BrokerTransportKind::ContentProvider, true),
				(BrokerTransportKind::BoundService, true),
			],
		);
		let no_service = device(
			true,
			&[
				(BrokerTransportKind::AccountManager, true),
				(BrokerTransportKind::ContentProvider, true),
				(BrokerTransportKind::BoundService, false),
			],
		);

		assert_eq!(
			select_broker_transport(&aad(), &ENABLED, Some(&all))
				.expect("Broker should be eligible.")
				.kind(),
			BrokerTransportKind::BoundService
		);
		assert_eq!(
			select_broker_transport(&aad(), &ENABLED, Some(&no_service))
				.expect("Broker should be eligible.")
				.kind(),
			BrokerTransportKind::ContentProvider
		);
	}

	#[test]
	fn ineligibility_reasons() {
		let usable = device(true, &[(BrokerTransportKind::AccountManager, true)]);
		let unverified = device(false, &[(BrokerTransportKind::BoundService, true)]);
		let unusable = device(true, &[(BrokerTransportKind::BoundService, false)]);
		let adfs = Authority::parse("https://fs.contoso.com/adfs").expect("Authority is valid.");
		let disabled = BrokerPolicy { enabled: false, ..ENABLED };
		let personal = BrokerPolicy { audience: Audience::PersonalAccounts, ..ENABLED };

		assert_eq!(reason(&aad(), &disabled, Some(&usable)), Some(BrokerIneligibility::NotEnabled));
		assert_eq!(
			reason(&adfs, &ENABLED, Some(&usable)),
			Some(BrokerIneligibility::NonAadAuthority)
		);
		assert_eq!(
			reason(&aad(), &personal, Some(&usable)),
			Some(BrokerIneligibility::PersonalAccountsOnly)
		);
		assert_eq!(reason(&aad(), &ENABLED, None), Some(BrokerIneligibility::NotInstalled));
		assert_eq!(
			reason(&aad(), &ENABLED, Some(&Device(None))),
			Some(BrokerIneligibility::NotInstalled)
		);
		assert_eq!(
			reason(&aad(), &ENABLED, Some(&unverified)),
			Some(BrokerIneligibility::UnverifiedSignature)
		);
		assert_eq!(
			reason(&aad(), &ENABLED, Some(&unusable)),
			Some(BrokerIneligibility::NoUsableTransport)
		);
		assert!(broker_eligible(&aad(), &ENABLED, Some(&usable)));
	}
}
