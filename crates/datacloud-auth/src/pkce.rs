//! PKCE (Proof Key for Code Exchange) per RFC 7636, plus the state nonce
//!
//! A fresh verifier pair and state nonce are generated for every interactive
//! login attempt and dropped once the code exchange completes or fails.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Error, Result};
use crate::registration::ClientRegistration;

/// Verifier/challenge pair for a single login attempt.
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let verifier = generate_verifier();
        let challenge = compute_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }
}

impl fmt::Debug for PkcePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkcePair")
            .field("verifier", &"[REDACTED]")
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// Generate a random PKCE code verifier.
///
/// 32 random bytes, URL-safe base64 without padding: 43 characters, the RFC
/// 7636 minimum length.
pub fn generate_verifier() -> String {
    random_token()
}

/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate the opaque `state` nonce echoed back on the callback.
pub fn generate_state() -> String {
    random_token()
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the browser URL for the authorization endpoint.
///
/// `redirect_uri` is passed separately from the registration because an
/// ephemeral callback port is only known once the listener is bound.
pub fn build_authorization_url(
    registration: &ClientRegistration,
    redirect_uri: &str,
    challenge: &str,
    state: &str,
) -> Result<String> {
    let mut url = Url::parse(&registration.authorize_endpoint())
        .map_err(|e| Error::Registration(format!("invalid authorization endpoint: {e}")))?;
    url.query_pairs_mut()
        .append_pair("client_id", &registration.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &registration.scopes.join(" "))
        .append_pair("prompt", "login")
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256")
        .append_pair("state", state);
    Ok(url.to_string())
}
