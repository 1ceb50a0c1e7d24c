pub mod server;

use secrecy::SecretString;

use crate::auth::roles::AdminRolePolicy;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        token_secret: SecretString,
        issuer: String,
        cookie_secure: bool,
        admin_policy: AdminRolePolicy,
    },
}
