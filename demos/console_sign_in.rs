//! Signs a user in from the terminal: the authorize URL is printed, the browser's final redirect
//! URL is pasted back, and the resulting tokens are persisted to a JSON file cache so the next
//! run can acquire silently.
//!
//! ```sh
//! MSAL_CLIENT_ID=<app id> cargo run --example console_sign_in
//! ```

// std
use std::{env, io, sync::Arc};
// crates.io
use color_eyre::{Result, eyre::eyre};
use url::Url;
// self
use msal::{
	auth::ClientId,
	authorization::{AgentFuture, AgentResponse, AuthorizationAgent, AuthorizationRequest},
	client::PublicClientApplication,
	config::PublicClientConfig,
	dispatch::CommandResult,
	request::{AcquireTokenParameters, AcquireTokenSilentParameters},
	store::{FileStore, TokenCacheStore},
};

struct ConsoleAgent;
impl AuthorizationAgent for ConsoleAgent {
	fn authorize<'a>(&'a self, request: &'a AuthorizationRequest) -> AgentFuture<'a> {
		Box::pin(async move {
			println!("Open this URL and sign in:\n\n{}\n", request.authorize_url);
			println!("Paste the URL you were redirected to (empty line cancels):");

			let line = tokio::task::spawn_blocking(|| {
				let mut line = String::new();

				io::stdin().read_line(&mut line).map(|_| line)
			})
			.await
			.ok()
			.and_then(Result::ok)
			.unwrap_or_default();

			match Url::parse(line.trim()) {
				Ok(redirect) => Ok(AgentResponse::Redirect(redirect)),
				Err(_) => Ok(AgentResponse::Cancelled),
			}
		})
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let client_id = env::var("MSAL_CLIENT_ID").map_err(|_| eyre!("MSAL_CLIENT_ID is not set"))?;
	let config = PublicClientConfig::new(
		ClientId::new(client_id)?,
		Url::parse("https://login.microsoftonline.com/common/oauth2/nativeclient")?,
	);
	let store: Arc<dyn TokenCacheStore> =
		Arc::new(FileStore::open(env::temp_dir().join("msal-console-cache.json"))?);
	let application = PublicClientApplication::new(config, store, Arc::new(ConsoleAgent))?;
	let scopes = ["User.Read"];

	if let Some(user) = application.users().await?.into_iter().next() {
		let label = user.displayable_id.clone().unwrap_or_else(|| user.user_identifier());

		match application
			.acquire_token_silent(AcquireTokenSilentParameters::new(scopes, Some(user)))
			.await
		{
			Ok(result) => {
				println!("Silent token for {label} expires at {}.", result.expires_on);

				return Ok(());
			},
			Err(e) if e.is_ui_required() => println!("Silent acquisition needs the UI: {e}"),
			Err(e) => return Err(e.into()),
		}
	}

	match application.acquire_token(AcquireTokenParameters::new(scopes)).await? {
		CommandResult::Success(result) => println!(
			"Signed in as {:?}; token expires at {}.",
			result.user.and_then(|user| user.displayable_id),
			result.expires_on
		),
		CommandResult::Cancelled => println!("Sign-in was cancelled."),
	}

	Ok(())
}
