// std
use std::sync::Arc;
// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use time::{Duration, OffsetDateTime};
// self
use msal::{
	auth::{ScopeSet, TokenSecret, User},
	cache::{CacheQuery, CacheTarget, TokenCache},
	error::Error,
	oauth::TokenSuccess,
	store::{CachePartition, FileStore, MemoryStore, TokenCacheStore},
};

const AUTHORITY: &str = "https://login.microsoftonline.com/contoso.com";
const HOST: &str = "login.microsoftonline.com";
const CLIENT_ID: &str = "4b0db8c2-9f26-4417-8bde-3f0e3656f8e0";

fn target() -> CacheTarget<'static> {
	CacheTarget { authority: AUTHORITY, authority_host: HOST, client_id: CLIENT_ID, policy: None }
}

fn scopes(raw: &str) -> ScopeSet {
	raw.parse().expect("Scope fixture is valid.")
}

fn response(uid: &str, upn: &str, expires_in: Duration) -> TokenSuccess {
	let now = OffsetDateTime::now_utc();
	let claims = format!(r#"{{"oid":"{uid}","tid":"contoso","preferred_username":"{upn}"}}"#);
	let id_token = format!(
		"{}.{}.",
		URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#),
		URL_SAFE_NO_PAD.encode(claims)
	);
	let client_info = URL_SAFE_NO_PAD.encode(format!(r#"{{"uid":"{uid}","utid":"contoso"}}"#));

	TokenSuccess {
		access_token: TokenSecret::new(format!("at-{uid}")),
		access_token_from_id_token: false,
		token_type: "Bearer".into(),
		refresh_token: Some(TokenSecret::new(format!("rt-{uid}"))),
		id_token: Some(id_token),
		client_info: Some(client_info),
		scope: Some(scopes("User.Read Mail.Read")),
		expires_on: now + expires_in,
		extended_expires_on: now + expires_in,
	}
}

fn query<'a>(requested: &'a ScopeSet, user: Option<&'a User>) -> CacheQuery<'a> {
	CacheQuery {
		authority: AUTHORITY,
		authority_host: HOST,
		client_id: CLIENT_ID,
		scopes: requested,
		policy: None,
		user,
	}
}

#[tokio::test]
async fn expired_access_token_misses_while_refresh_token_survives() {
	let cache = TokenCache::new(Arc::new(MemoryStore::default()));
	let requested = scopes("User.Read");
	let (_, user) = cache
		.save(target(), &requested, &response("ada", "ada@contoso.com", -Duration::minutes(1)))
		.await
		.expect("Save should succeed.");
	let user = user.expect("Response carries an ID token.");

	assert!(
		cache
			.find_access_token(&query(&requested, Some(&user)))
			.await
			.expect("Lookup should succeed.")
			.is_none()
	);

	let refresh = cache
		.find_refresh_token(&query(&requested, Some(&user)))
		.await
		.expect("Lookup should succeed.")
		.expect("Refresh token should still be cached.");

	assert_eq!(refresh.refresh_token.expose(), "rt-ada");
	assert_eq!(refresh.user.as_ref(), Some(&user));
}

#[tokio::test]
async fn user_less_lookup_across_two_users_is_ambiguous() {
	let cache = TokenCache::new(Arc::new(MemoryStore::default()));
	let requested = scopes("User.Read");
	let (_, ada) = cache
		.save(target(), &requested, &response("ada", "ada@contoso.com", Duration::hours(1)))
		.await
		.expect("Save should succeed.");
	let (_, bob) = cache
		.save(target(), &requested, &response("bob", "bob@contoso.com", Duration::hours(1)))
		.await
		.expect("Save should succeed.");
	let (ada, bob) = (ada.expect("Ada is signed in."), bob.expect("Bob is signed in."));
	let err = cache
		.find_access_token(&query(&requested, None))
		.await
		.expect_err("Two users should make the lookup ambiguous.");

	assert!(matches!(err, Error::MultipleCacheEntries { kind: "access token" }));

	let err = cache
		.find_refresh_token(&query(&requested, None))
		.await
		.expect_err("Two refresh tokens should make the lookup ambiguous.");

	assert!(matches!(err, Error::MultipleCacheEntries { kind: "refresh token" }));

	for (user, expected) in [(&ada, "at-ada"), (&bob, "at-bob")] {
		let item = cache
			.find_access_token(&query(&requested, Some(user)))
			.await
			.expect("Lookup should succeed.")
			.expect("Each user has a token.");

		assert_eq!(item.access_token.expose(), expected);
		assert_eq!(item.user.as_ref(), Some(user));
	}
}

#[tokio::test]
async fn users_and_remove_user_operate_per_client() {
	let store = Arc::new(MemoryStore::default());
	let cache = TokenCache::new(store.clone());
	let requested = scopes("User.Read");
	let (_, ada) = cache
		.save(target(), &requested, &response("ada", "ada@contoso.com", Duration::hours(1)))
		.await
		.expect("Save should succeed.");
	let other_client = CacheTarget { client_id: "other-client", ..target() };

	cache
		.save(other_client, &requested, &response("bob", "bob@contoso.com", Duration::hours(1)))
		.await
		.expect("Save should succeed.");

	let ada = ada.expect("Ada is signed in.");
	let users = cache.users(CLIENT_ID).await.expect("Users should list.");

	assert_eq!(users, vec![ada.clone()]);

	let removed = cache.remove_user(CLIENT_ID, &ada).await.expect("Removal should succeed.");

	assert_eq!(removed, 2);
	assert!(cache.users(CLIENT_ID).await.expect("Users should list.").is_empty());
	assert_eq!(store.len(CachePartition::AccessToken), 1);
	assert_eq!(store.len(CachePartition::RefreshToken), 1);
}

#[tokio::test]
async fn file_store_persists_cache_across_reopen() {
	let path = std::env::temp_dir().join(format!("msal-cache-it-{}.json", uuid::Uuid::new_v4()));
	let requested = scopes("User.Read");
	let user = {
		let store = Arc::new(FileStore::open(&path).expect("File store should open."));
		let cache = TokenCache::new(store);

		cache
			.save(target(), &requested, &response("ada", "ada@contoso.com", Duration::hours(1)))
			.await
			.expect("Save should succeed.")
			.1
			.expect("Ada is signed in.")
	};
	let store: Arc<dyn TokenCacheStore> =
		Arc::new(FileStore::open(&path).expect("File store should reopen."));
	let cache = TokenCache::new(store);
	let item = cache
		.find_access_token(&query(&requested, Some(&user)))
		.await
		.expect("Lookup should succeed.")
		.expect("Token should survive a reopen.");

	assert_eq!(item.access_token.expose(), "at-ada");

	let _ = std::fs::remove_file(&path);
}
