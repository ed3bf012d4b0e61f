//! Microsoft identity platform public-client core: authority discovery, a deterministic
//! token cache, silent/interactive command dispatch, and broker selection in one async crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authority;
pub mod authorization;
pub mod broker;
pub mod cache;
pub mod client;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod request;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		authorization::AuthorizationAgent,
		client::PublicClientApplication,
		config::PublicClientConfig,
		http::{ReqwestHttpClient, ReqwestTransportErrorMapper},
		store::{MemoryStore, TokenCacheStore},
	};

	/// Application type alias used by reqwest-backed integration tests.
	pub type ReqwestTestApplication =
		PublicClientApplication<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Constructs a [`PublicClientApplication`] backed by an in-memory store and the reqwest
	/// transport used across integration tests. Must be called inside a Tokio runtime.
	pub fn build_reqwest_test_application(
		config: PublicClientConfig,
		agent: Arc<dyn AuthorizationAgent>,
	) -> (ReqwestTestApplication, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn TokenCacheStore> = store_backend.clone();
		let application = PublicClientApplication::with_http_client(
			config,
			store,
			agent,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.expect("Failed to build test application.");

		(application, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		hash::{Hash, Hasher},
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;
	pub use uuid::Uuid;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
