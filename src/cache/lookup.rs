//! Lookup engine over the persisted cache partitions.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, User},
	cache::{AccessTokenCacheItem, CacheTarget, RefreshTokenCacheItem, TokenCacheKey},
	oauth::TokenSuccess,
	obs,
	store::{CachePartition, StoreError, TokenCacheStore},
};

/// Access tokens expiring within this window are treated as expired.
pub const DEFAULT_EXPIRATION_BUFFER: Duration = Duration::minutes(5);

/// Parameters identifying the token a request needs.
#[derive(Clone, Copy, Debug)]
pub struct CacheQuery<'a> {
	/// Canonical authority.
	pub authority: &'a str,
	/// Authority host, used for refresh tokens.
	pub authority_host: &'a str,
	/// Requesting client id.
	pub client_id: &'a str,
	/// Requested scopes (reserved scopes excluded).
	pub scopes: &'a ScopeSet,
	/// B2C policy, if any.
	pub policy: Option<&'a str>,
	/// User to disambiguate with; `None` matches any user.
	pub user: Option<&'a User>,
}

/// Token cache facade that owns the store handle and the expiry policy.
///
/// Saves and user removals are serialized by an internal async lock so each multi-key update
/// is applied as a unit relative to other writers.
pub struct TokenCache {
	store: Arc<dyn TokenCacheStore>,
	expiration_buffer: Duration,
	write_lock: AsyncMutex<()>,
}
impl TokenCache {
	/// Wraps `store` with the default expiration buffer.
	pub fn new(store: Arc<dyn TokenCacheStore>) -> Self {
		Self::with_expiration_buffer(store, DEFAULT_EXPIRATION_BUFFER)
	}

	/// Wraps `store` with a custom expiration buffer.
	pub fn with_expiration_buffer(store: Arc<dyn TokenCacheStore>, buffer: Duration) -> Self {
		Self { store, expiration_buffer: buffer, write_lock: AsyncMutex::new(()) }
	}

	/// Underlying store.
	pub fn store(&self) -> &Arc<dyn TokenCacheStore> {
		&self.store
	}

	/// Finds an unexpired access token covering the requested scopes.
	///
	/// Fails with [`Error::MultipleCacheEntries`] when more than one record matches. An
	/// expired match is reported as a miss and left in place.
	pub async fn find_access_token(
		&self,
		query: &CacheQuery<'_>,
	) -> Result<Option<AccessTokenCacheItem>> {
		let now = OffsetDateTime::now_utc();
		let candidate = self.find_access_token_candidate(query).await?;

		Ok(candidate.filter(|item| !item.is_expired(now, self.expiration_buffer)))
	}

	/// Finds a matching access token that is expired but still inside its extended lifetime.
	pub async fn find_extended_access_token(
		&self,
		query: &CacheQuery<'_>,
	) -> Result<Option<AccessTokenCacheItem>> {
		let now = OffsetDateTime::now_utc();
		let candidate = self.find_access_token_candidate(query).await?;

		Ok(candidate.filter(|item| !item.is_extended_expired(now)))
	}

	/// Finds the refresh token for the authority host and client.
	///
	/// Without a user, more than one user's refresh token is an ambiguity error.
	pub async fn find_refresh_token(
		&self,
		query: &CacheQuery<'_>,
	) -> Result<Option<RefreshTokenCacheItem>> {
		if let Some(user) = query.user {
			let key =
				TokenCacheKey::refresh_token(query.authority_host, query.client_id, Some(user))?;
			let raw = self.store.read(CachePartition::RefreshToken, key.as_str()).await?;

			return Ok(raw.and_then(|raw| decode(CachePartition::RefreshToken, key.as_str(), &raw)));
		}

		let host = query.authority_host.to_ascii_lowercase();
		let client_id = query.client_id.to_ascii_lowercase();
		let mut matches = self
			.refresh_tokens()
			.await?
			.into_iter()
			.filter(|item| item.authority_host == host && item.client_id == client_id)
			.collect::<Vec<_>>();

		match matches.len() {
			0 => Ok(None),
			1 => Ok(matches.pop()),
			_ => Err(Error::MultipleCacheEntries { kind: "refresh token" }),
		}
	}

	/// Persists a successful response.
	///
	/// Access tokens of the same authority, client, user, and policy whose scopes intersect the
	/// new scopes are removed first. The refresh token is replaced by key; a response without one
	/// keeps the existing record.
	pub async fn save(
		&self,
		target: CacheTarget<'_>,
		requested: &ScopeSet,
		response: &TokenSuccess,
	) -> Result<(AccessTokenCacheItem, Option<User>)> {
		let user = response.user()?;
		let access = AccessTokenCacheItem::from_response(target, requested, response, user.clone());
		let access_key = access.key()?;
		let refresh = RefreshTokenCacheItem::from_response(target, response, user.clone());
		let _guard = self.write_lock.lock().await;

		for (key, stale) in self.access_token_entries().await? {
			if key != access_key.as_str()
				&& stale.authority == access.authority
				&& stale.client_id == access.client_id
				&& policy_matches(stale.policy.as_deref(), access.policy.as_deref())
				&& stale.user_identifier() == access.user_identifier()
				&& stale.scope.intersects(&access.scope)
			{
				self.store.remove(CachePartition::AccessToken, &key).await?;
			}
		}

		self.store
			.write(CachePartition::AccessToken, access_key.as_str(), encode(&access)?)
			.await?;

		if let Some(refresh) = refresh {
			let key = refresh.key()?;

			self.store.write(CachePartition::RefreshToken, key.as_str(), encode(&refresh)?).await?;
		}

		Ok((access, user))
	}

	/// Deletes a refresh token record.
	pub async fn remove_refresh_token(&self, item: &RefreshTokenCacheItem) -> Result<bool> {
		let key = item.key()?;
		let _guard = self.write_lock.lock().await;

		Ok(self.store.remove(CachePartition::RefreshToken, key.as_str()).await?)
	}

	/// Distinct users holding refresh tokens for `client_id`.
	pub async fn users(&self, client_id: &str) -> Result<Vec<User>> {
		let client_id = client_id.to_ascii_lowercase();
		let mut seen = BTreeSet::new();
		let mut users = Vec::new();

		for item in self.refresh_tokens().await? {
			let Some(user) = item.user else { continue };

			if item.client_id == client_id && seen.insert(user.user_identifier()) {
				users.push(user);
			}
		}

		Ok(users)
	}

	/// Deletes every access and refresh token `user` holds for `client_id`.
	pub async fn remove_user(&self, client_id: &str, user: &User) -> Result<usize> {
		let client_id = client_id.to_ascii_lowercase();
		let identifier = user.user_identifier();
		let _guard = self.write_lock.lock().await;
		let mut removed = 0;

		for (key, item) in self.access_token_entries().await? {
			if item.client_id == client_id && item.user_identifier().as_deref() == Some(&identifier)
			{
				removed += usize::from(self.store.remove(CachePartition::AccessToken, &key).await?);
			}
		}
		for (key, item) in self.refresh_token_entries().await? {
			if item.client_id == client_id && item.user_identifier().as_deref() == Some(&identifier)
			{
				let existed = self.store.remove(CachePartition::RefreshToken, &key).await?;

				removed += usize::from(existed);
			}
		}

		Ok(removed)
	}

	async fn find_access_token_candidate(
		&self,
		query: &CacheQuery<'_>,
	) -> Result<Option<AccessTokenCacheItem>> {
		let authority = query.authority.to_ascii_lowercase();
		let client_id = query.client_id.to_ascii_lowercase();
		let user_identifier = query.user.map(User::user_identifier);
		let mut matches = self
			.access_token_entries()
			.await?
			.into_iter()
			.map(|(_, item)| item)
			.filter(|item| {
				item.authority == authority
					&& item.client_id == client_id
					&& policy_matches(item.policy.as_deref(), query.policy)
					&& (item.scope.is_empty() || item.scope.is_superset_of(query.scopes))
			})
			.filter(|item| match &user_identifier {
				Some(identifier) => item.user_identifier().as_ref() == Some(identifier),
				None => true,
			})
			.collect::<Vec<_>>();

		match matches.len() {
			0 => Ok(None),
			1 => Ok(matches.pop()),
			_ => Err(Error::MultipleCacheEntries { kind: "access token" }),
		}
	}

	async fn access_token_entries(&self) -> Result<Vec<(String, AccessTokenCacheItem)>> {
		self.decoded_entries(CachePartition::AccessToken).await
	}

	async fn refresh_token_entries(&self) -> Result<Vec<(String, RefreshTokenCacheItem)>> {
		self.decoded_entries(CachePartition::RefreshToken).await
	}

	async fn refresh_tokens(&self) -> Result<Vec<RefreshTokenCacheItem>> {
		Ok(self.refresh_token_entries().await?.into_iter().map(|(_, item)| item).collect())
	}

	async fn decoded_entries<T>(&self, partition: CachePartition) -> Result<Vec<(String, T)>>
	where
		T: for<'de> Deserialize<'de>,
	{
		let entries = self.store.entries(partition).await?;

		Ok(entries
			.into_iter()
			.filter_map(|(key, raw)| decode(partition, &key, &raw).map(|item| (key, item)))
			.collect())
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache").field("expiration_buffer", &self.expiration_buffer).finish()
	}
}

fn policy_matches(stored: Option<&str>, requested: Option<&str>) -> bool {
	match (stored, requested) {
		(None, None) => true,
		(Some(stored), Some(requested)) => stored.eq_ignore_ascii_case(requested),
		_ => false,
	}
}

fn encode<T>(item: &T) -> Result<String, StoreError>
where
	T: Serialize,
{
	serde_json::to_string(item)
		.map_err(|e| StoreError::Serialization { message: format!("Failed to encode record: {e}") })
}

// Unreadable records are skipped so one corrupt entry does not poison every lookup.
fn decode<T>(partition: CachePartition, key: &str, raw: &str) -> Option<T>
where
	T: for<'de> Deserialize<'de>,
{
	match serde_json::from_str(raw) {
		Ok(item) => Some(item),
		Err(e) => {
			obs::warn(format_args!("Skipping unreadable {partition} record {key}: {e}"));

			None
		},
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{auth::TokenSecret, store::MemoryStore};

	const AUTHORITY: &str = "https://login.microsoftonline.com/common";
	const HOST: &str = "login.microsoftonline.com";

	fn scopes(raw: &str) -> ScopeSet {
		ScopeSet::from_str(raw).expect("Scope fixture is valid.")
	}

	fn target() -> CacheTarget<'static> {
		CacheTarget {
			authority: AUTHORITY,
			authority_host: HOST,
			client_id: "client",
			policy: None,
		}
	}

	fn item(scope: &str, user: Option<User>, expires_in: Duration) -> AccessTokenCacheItem {
		let now = OffsetDateTime::now_utc();

		AccessTokenCacheItem {
			authority: AUTHORITY.into(),
			client_id: "client".into(),
			policy: None,
			scope: scopes(scope),
			access_token: TokenSecret::new(format!("at-{scope}")),
			token_type: "Bearer".into(),
			expires_on: now + expires_in,
			extended_expires_on: now + expires_in + Duration::hours(1),
			tenant_id: None,
			raw_client_info: None,
			raw_id_token: None,
			user,
		}
	}

	async fn put(store: &MemoryStore, item: &AccessTokenCacheItem) {
		let key = item.key().expect("Key should build.");

		store
			.write(CachePartition::AccessToken, key.as_str(), encode(item).expect("Item encodes."))
			.await
			.expect("Write should succeed.");
	}

	fn cache() -> (TokenCache, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::default());

		(TokenCache::new(store.clone()), store)
	}

	#[tokio::test]
	async fn superset_match_is_returned() {
		let (cache, store) = cache();

		put(&store, &item("Mail.Read User.Read", None, Duration::hours(1))).await;

		let requested = scopes("User.Read");
		let query = CacheQuery {
			authority: "HTTPS://login.microsoftonline.com/COMMON",
			authority_host: HOST,
			client_id: "CLIENT",
			scopes: &requested,
			policy: None,
			user: None,
		};
		let found = cache.find_access_token(&query).await.expect("Lookup should succeed.");

		assert_eq!(
			found.map(|i| i.access_token.expose().to_owned()),
			Some("at-Mail.Read User.Read".into())
		);
	}

	#[tokio::test]
	async fn missing_scope_and_wrong_policy_are_misses() {
		let (cache, store) = cache();

		put(&store, &item("User.Read", None, Duration::hours(1))).await;

		let requested = scopes("User.Read Files.Read");
		let mut query = CacheQuery {
			authority: AUTHORITY,
			authority_host: HOST,
			client_id: "client",
			scopes: &requested,
			policy: None,
			user: None,
		};

		assert!(cache.find_access_token(&query).await.expect("Lookup should succeed.").is_none());

		let single = scopes("User.Read");

		query.scopes = &single;
		query.policy = Some("B2C_1_signin");

		assert!(cache.find_access_token(&query).await.expect("Lookup should succeed.").is_none());
	}

	#[tokio::test]
	async fn empty_stored_scope_matches_any_request() {
		let (cache, store) = cache();

		put(&store, &item("", None, Duration::hours(1))).await;

		let requested = scopes("User.Read");
		let query = CacheQuery {
			authority: AUTHORITY,
			authority_host: HOST,
			client_id: "client",
			scopes: &requested,
			policy: None,
			user: None,
		};

		assert!(cache.find_access_token(&query).await.expect("Lookup should succeed.").is_some());
	}

	#[tokio::test]
	async fn save_evicts_intersecting_scopes_and_keeps_refresh_token() {
		let (cache, store) = cache();
		let now = OffsetDateTime::now_utc();
		let first = TokenSuccess {
			access_token: TokenSecret::new("at-1"),
			access_token_from_id_token: false,
			token_type: "Bearer".into(),
			refresh_token: Some(TokenSecret::new("rt-1")),
			id_token: None,
			client_info: None,
			scope: Some(scopes("User.Read Mail.Read")),
			expires_on: now + Duration::hours(1),
			extended_expires_on: now + Duration::hours(1),
		};
		let second = TokenSuccess {
			access_token: TokenSecret::new("at-2"),
			refresh_token: None,
			scope: Some(scopes("Mail.Read Files.Read")),
			..first.clone()
		};

		cache.save(target(), &scopes("User.Read"), &first).await.expect("First save.");
		cache.save(target(), &scopes("Files.Read"), &second).await.expect("Second save.");

		assert_eq!(store.len(CachePartition::AccessToken), 1);

		let requested = scopes("Files.Read");
		let query = CacheQuery {
			authority: AUTHORITY,
			authority_host: HOST,
			client_id: "client",
			scopes: &requested,
			policy: None,
			user: None,
		};
		let refresh = cache
			.find_refresh_token(&query)
			.await
			.expect("Lookup should succeed.")
			.expect("Refresh token should survive a response without one.");

		assert_eq!(refresh.refresh_token.expose(), "rt-1");
	}

	#[tokio::test]
	async fn corrupt_records_are_skipped() {
		let (cache, store) = cache();

		store
			.write(CachePartition::AccessToken, "garbage", "{not json".into())
			.await
			.expect("Write should succeed.");
		put(&store, &item("User.Read", None, Duration::hours(1))).await;

		let requested = scopes("User.Read");
		let query = CacheQuery {
			authority: AUTHORITY,
			authority_host: HOST,
			client_id: "client",
			scopes: &requested,
			policy: None,
			user: None,
		};

		assert!(cache.find_access_token(&query).await.expect("Lookup should succeed.").is_some());
	}
}
