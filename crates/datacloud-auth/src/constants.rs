//! Salesforce OAuth defaults
//!
//! These are the values used when the operator does not override them through
//! the environment or the config file. None of them are secrets.

use std::time::Duration;

/// Identity provider host used when `SF_LOGIN_URL` is unset.
pub const DEFAULT_LOGIN_HOST: &str = "login.salesforce.com";

/// Callback URL registered on the connected app by default.
///
/// Port 5555 collides with other local tooling in at least one target
/// environment, hence 5556. The port is still fully configurable.
pub const DEFAULT_CALLBACK_URL: &str = "http://localhost:5556/Callback";

/// Authorization endpoint path, relative to the login base URL.
pub const AUTHORIZE_PATH: &str = "/services/oauth2/authorize";

/// Token endpoint path for code exchange and refresh.
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Scopes requested during interactive login.
///
/// `cdp_query_api` and `cdp_profile_api` gate the Data Cloud query and profile
/// APIs; `refresh_token` is what makes Salesforce issue a refresh token at all.
pub const DEFAULT_SCOPES: &[&str] = &["api", "cdp_query_api", "cdp_profile_api", "refresh_token"];

/// Access-token lifetime assumed when the token response carries no
/// `expires_in`. Salesforce omits it; sessions in the reference org last
/// about 110 minutes.
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 6600;

/// A credential is treated as stale this long before its computed expiry.
pub const DEFAULT_SAFETY_MARGIN: Duration = Duration::from_secs(60);

/// How long the callback listener waits for the browser redirect.
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(120);
