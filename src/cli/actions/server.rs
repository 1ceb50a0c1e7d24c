use crate::api;
use crate::auth::{rate_limit::SlidingWindowLimiter, AuthState};
use crate::cli::actions::Action;
use anyhow::Result;
use std::sync::Arc;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            token_secret,
            issuer,
            cookie_secure,
            admin_policy,
        } => {
            let auth_state = AuthState::new(
                token_secret,
                issuer,
                cookie_secure,
                admin_policy,
                Arc::new(SlidingWindowLimiter::new()),
            );

            api::new(port, dsn, auth_state).await?;
        }
    }

    Ok(())
}
