use crate::auth::roles::AdminRolePolicy;
use crate::cli::actions::Action;
use anyhow::{anyhow, Result};
use secrecy::SecretString;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let admin_policy = matches
        .get_one::<String>("admin-role-policy")
        .and_then(|policy| AdminRolePolicy::parse(policy))
        .unwrap_or_default();

    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow!("missing required argument: --dsn"))?,
        token_secret: matches
            .get_one("token-secret")
            .map(|s: &String| SecretString::from(s.to_string()))
            .ok_or_else(|| anyhow!("missing required argument: --token-secret"))?,
        issuer: matches
            .get_one("issuer")
            .map_or_else(|| "gardi".to_string(), |s: &String| s.to_string()),
        cookie_secure: !matches.get_flag("insecure-cookies"),
        admin_policy,
    })
}
