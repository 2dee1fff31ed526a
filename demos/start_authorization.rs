//! Starts a Spotify authorization, then shows the pending attempt surviving a restart through
//! the file store and rejecting a forged callback.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use url::Url;
// self
use oauth2_session::{
	auth::ScopeSet,
	provider::{ProviderDescriptor, SpotifyProviderStrategy},
	session::{SessionConfig, SessionManager},
	store::FileStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let store = Arc::new(FileStore::open(std::env::temp_dir().join("oauth2-session-demo.json"))?);
	let config = SessionConfig::new(
		"demo-client",
		Url::parse("http://127.0.0.1:8888/callback")?,
		ScopeSet::new(["streaming", "user-read-private"])?,
	);
	let session = SessionManager::builder(config.clone(), ProviderDescriptor::spotify()?)
		.strategy(Arc::new(SpotifyProviderStrategy))
		.store(store.clone())
		.build();
	let request = session.begin_authorization().await?;

	println!("Send your user to {}.", request.url);
	println!("State is now {}.", session.session_state());

	// A second manager over the same store plays the part of a restarted process.
	let restarted = SessionManager::builder(config, ProviderDescriptor::spotify()?)
		.strategy(Arc::new(SpotifyProviderStrategy))
		.store(store)
		.build();

	println!("Restored state: {}.", restarted.restore().await);

	if let Err(e) = restarted.complete_authorization(Some("code"), Some("forged")).await {
		println!("Forged callback rejected: {e}");
	}

	println!("State after the forged callback: {}.", restarted.session_state());

	restarted.logout().await;

	Ok(())
}
