use crate::api;
use crate::challenge::{ChallengeSessionStore, DEFAULT_PURGE_GRACE_SECONDS};
use crate::cli::actions::Action;
use crate::clock::{Clock, SystemClock};
use crate::credentials::{CredentialStore, Credentials, GuardedCredentials};
use crate::flow::AuthFlow;
use crate::notify::LogNotifier;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Handle the server action: wire the engines, restore any snapshot and serve.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        users_file,
        state_file,
    } = action;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(match users_file {
        Some(path) => Credentials::load(&path)?,
        None => Credentials::new(),
    });
    let credentials: Arc<dyn CredentialStore> = Arc::new(GuardedCredentials::new(
        Arc::clone(&store),
        Arc::clone(&clock),
    ));

    let sessions = ChallengeSessionStore::new(Arc::clone(&clock));
    if let Some(path) = &state_file {
        if path.exists() {
            let restored = sessions.restore(path)?;
            info!(restored, "restored challenge sessions from snapshot");
        }
    }
    // Opportunistic cleanup at startup; expiry itself is lazy.
    sessions.purge_expired(DEFAULT_PURGE_GRACE_SECONDS);

    let flow = Arc::new(
        AuthFlow::new(
            RateLimiter::new(Arc::clone(&clock), RateLimitConfig::new()),
            sessions,
            credentials,
            Arc::new(LogNotifier),
        )
        .with_registrar(store),
    );

    tokio::select! {
        result = api::serve(port, Arc::clone(&flow)) => result?,
        _ = tokio::signal::ctrl_c() => {
            if let Some(path) = &state_file {
                let saved = flow.sessions().snapshot(path)?;
                info!(saved, "snapshotted challenge sessions");
            }
            info!("Gracefully shutdown");
        }
    }

    Ok(())
}
