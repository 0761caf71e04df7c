//! In-memory token store with optional on-disk cache
//!
//! Holds at most one credential. Every replacement bumps a monotonic
//! generation number; conditional operations take the generation the caller
//! observed so that a late refresh or a late 401 can never clobber a newer
//! credential.
//!
//! Writes replace the whole credential under the write lock, so readers see
//! either the previous value or the next one, never a mix.
//!
//! When a cache path is configured, every mutation is mirrored to disk with an
//! atomic temp-file + rename (mode 0600). Cache write failures are logged and
//! otherwise ignored: the in-memory state stays authoritative.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::token::TokenResponse;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An OAuth credential for the Data Cloud connection.
///
/// `issued_at + expires_in` is the authoritative expiry. `issued_at` is the
/// local receive time of the token response, in unix milliseconds.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Base URL of the Salesforce instance that serves the data API
    pub instance_url: String,
    /// Unix milliseconds
    pub issued_at: u64,
    /// Seconds
    pub expires_in: u64,
    /// Assigned by the store on every write
    #[serde(skip)]
    pub generation: u64,
    #[serde(skip)]
    forced_stale: bool,
}

impl Credential {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        instance_url: impl Into<String>,
        issued_at: u64,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            instance_url: instance_url.into(),
            issued_at,
            expires_in,
            generation: 0,
            forced_stale: false,
        }
    }

    /// Build a credential from a token endpoint response received at `issued_at`.
    ///
    /// Fields the response omits are carried over from `previous` (refresh
    /// responses usually lack a refresh token), then from `fallback_instance_url`.
    pub fn from_token_response(
        response: TokenResponse,
        issued_at: u64,
        previous: Option<&Credential>,
        fallback_instance_url: &str,
    ) -> Self {
        let expires_in = response.lifetime_secs();
        let refresh_token = response
            .refresh_token
            .or_else(|| previous.and_then(|p| p.refresh_token.clone()));
        let instance_url = response
            .instance_url
            .or_else(|| previous.map(|p| p.instance_url.clone()))
            .unwrap_or_else(|| fallback_instance_url.to_string());
        Self::new(
            response.access_token,
            refresh_token,
            instance_url,
            issued_at,
            expires_in,
        )
    }

    /// Absolute expiry in unix milliseconds.
    pub fn expires_at(&self) -> u64 {
        self.issued_at
            .saturating_add(self.expires_in.saturating_mul(1000))
    }

    /// Valid means usable for at least `margin` more, and not invalidated by a 401.
    pub fn is_valid_at(&self, now_millis: u64, margin: Duration) -> bool {
        !self.forced_stale && !self.expires_within(now_millis, margin)
    }

    pub fn is_valid(&self, margin: Duration) -> bool {
        self.is_valid_at(now_millis(), margin)
    }

    /// Whether the clock-based expiry falls within `window` of `now_millis`.
    pub fn expires_within(&self, now_millis: u64, window: Duration) -> bool {
        now_millis.saturating_add(window.as_millis() as u64) >= self.expires_at()
    }

    /// Set by the gateway after the data API rejected this access token.
    pub fn is_forced_stale(&self) -> bool {
        self.forced_stale
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("instance_url", &self.instance_url)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("generation", &self.generation)
            .field("forced_stale", &self.forced_stale)
            .finish()
    }
}

#[derive(Default)]
struct State {
    current: Option<Credential>,
    generation: u64,
}

impl State {
    fn install(&mut self, mut credential: Credential) -> Credential {
        self.generation += 1;
        credential.generation = self.generation;
        credential.forced_stale = false;
        self.current = Some(credential.clone());
        credential
    }
}

/// Holder of the single current credential.
///
/// Starts empty. Shared as `Arc<TokenStore>` between the flow controller
/// (the only writer of new credentials) and anything that needs to inspect it.
pub struct TokenStore {
    state: RwLock<State>,
    cache_path: Option<PathBuf>,
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenStore {
    /// Empty, memory-only store.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            cache_path: None,
        }
    }

    /// Store mirrored to `path`. An existing cache file seeds the store so a
    /// restarted process can refresh instead of logging in again.
    pub async fn with_cache(path: PathBuf) -> Result<Self> {
        let mut state = State::default();
        if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading token cache: {e}")))?;
            let cached: Option<Credential> = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing token cache: {e}")))?;
            if let Some(credential) = cached {
                state.install(credential);
                info!(path = %path.display(), "loaded cached credential");
            }
        } else {
            debug!(path = %path.display(), "token cache not found, starting empty");
        }

        Ok(Self {
            state: RwLock::new(state),
            cache_path: Some(path),
        })
    }

    /// Clone of the current credential, if any.
    pub async fn get(&self) -> Option<Credential> {
        self.state.read().await.current.clone()
    }

    /// Generation of the most recent write (0 = never written).
    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Unconditionally install a credential. Returns it with its new generation.
    pub async fn set(&self, credential: Credential) -> Credential {
        let mut state = self.state.write().await;
        let stored = state.install(credential);
        debug!(generation = stored.generation, "credential stored");
        self.persist(&state).await;
        stored
    }

    /// Install `credential` only if nothing was written since `expected_generation`.
    ///
    /// Returns `None` when the write was superseded and discarded.
    pub async fn replace_if_current(
        &self,
        expected_generation: u64,
        credential: Credential,
    ) -> Option<Credential> {
        let mut state = self.state.write().await;
        if state.generation != expected_generation {
            debug!(
                expected_generation,
                current_generation = state.generation,
                "discarding superseded credential"
            );
            return None;
        }
        let stored = state.install(credential);
        self.persist(&state).await;
        Some(stored)
    }

    /// Flag the credential of `generation` as stale so the next token request
    /// refreshes it. No-op if a newer credential is already in place.
    pub async fn mark_stale(&self, generation: u64) -> bool {
        let mut state = self.state.write().await;
        match state.current.as_mut() {
            Some(current) if current.generation == generation => {
                current.forced_stale = true;
                true
            }
            _ => false,
        }
    }

    /// Drop the current credential.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.generation += 1;
        state.current = None;
        debug!(generation = state.generation, "credential cleared");
        self.persist(&state).await;
    }

    /// Drop the credential only if it is still the one of `generation`.
    pub async fn clear_if_current(&self, generation: u64) -> bool {
        let mut state = self.state.write().await;
        let is_current = state
            .current
            .as_ref()
            .is_some_and(|current| current.generation == generation);
        if !is_current {
            return false;
        }
        state.generation += 1;
        state.current = None;
        debug!(generation = state.generation, "credential cleared");
        self.persist(&state).await;
        true
    }

    async fn persist(&self, state: &State) {
        let Some(path) = &self.cache_path else {
            return;
        };
        if let Err(e) = write_atomic(path, state.current.as_ref()).await {
            warn!(path = %path.display(), error = %e, "failed to persist token cache");
        }
    }
}

/// Write the cache file atomically.
///
/// Writes a temporary file in the same directory, restricts it to 0600 since
/// it holds tokens, then renames it over the target.
async fn write_atomic(path: &Path, credential: Option<&Credential>) -> Result<()> {
    let json = serde_json::to_string_pretty(&credential)
        .map_err(|e| Error::CredentialParse(format!("serializing token cache: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("token cache path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".token-cache.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp token cache: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting token cache permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp token cache: {e}")))?;

    debug!(path = %path.display(), "persisted token cache");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const MARGIN: Duration = Duration::from_secs(60);

    fn credential(access: &str, issued_at: u64, expires_in: u64) -> Credential {
        Credential::new(
            access,
            Some(format!("refresh-{access}")),
            "https://acme.my.salesforce.com",
            issued_at,
            expires_in,
        )
    }

    #[test]
    fn validity_honours_safety_margin() {
        let issued = 1_700_000_000_000;
        let cred = credential("T1", issued, 6600);
        assert_eq!(cred.expires_at(), issued + 6_600_000);

        assert!(cred.is_valid_at(issued, MARGIN));
        // 61s before expiry: still valid
        assert!(cred.is_valid_at(issued + 6_539_000, MARGIN));
        // Exactly at the margin: stale
        assert!(!cred.is_valid_at(issued + 6_540_000, MARGIN));
        // Past expiry: stale
        assert!(!cred.is_valid_at(issued + 7_000_000, MARGIN));
    }

    #[test]
    fn from_refresh_response_keeps_previous_refresh_token_and_instance() {
        let previous = credential("T1", 0, 6600);
        let response = TokenResponse {
            access_token: "T2".into(),
            refresh_token: None,
            expires_in: Some(3600),
            instance_url: None,
        };
        let next = Credential::from_token_response(response, 42, Some(&previous), "https://fallback");
        assert_eq!(next.access_token, "T2");
        assert_eq!(next.refresh_token.as_deref(), Some("refresh-T1"));
        assert_eq!(next.instance_url, "https://acme.my.salesforce.com");
        assert_eq!(next.issued_at, 42);
        assert_eq!(next.expires_in, 3600);
    }

    #[test]
    fn from_login_response_without_instance_uses_fallback() {
        let response = TokenResponse {
            access_token: "T1".into(),
            refresh_token: Some("R1".into()),
            expires_in: None,
            instance_url: None,
        };
        let cred = Credential::from_token_response(response, 0, None, "https://login.example");
        assert_eq!(cred.instance_url, "https://login.example");
        assert_eq!(cred.expires_in, crate::constants::DEFAULT_TOKEN_LIFETIME_SECS);
    }

    #[test]
    fn debug_redacts_tokens() {
        let cred = credential("secret-access", 0, 60);
        let debug = format!("{cred:?}");
        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("refresh-secret-access"));
        assert!(debug.contains("acme.my.salesforce.com"));
    }

    #[tokio::test]
    async fn starts_absent() {
        let store = TokenStore::new();
        assert!(store.get().await.is_none());
        assert_eq!(store.generation().await, 0);
    }

    #[tokio::test]
    async fn set_assigns_increasing_generations() {
        let store = TokenStore::new();
        let first = store.set(credential("T1", now_millis(), 6600)).await;
        let second = store.set(credential("T2", now_millis(), 6600)).await;
        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(store.get().await.unwrap().access_token, "T2");
    }

    #[tokio::test]
    async fn superseded_replace_is_discarded() {
        let store = TokenStore::new();
        let first = store.set(credential("T1", now_millis(), 6600)).await;
        store.set(credential("T2", now_millis(), 6600)).await;

        let late = store
            .replace_if_current(first.generation, credential("T-late", now_millis(), 6600))
            .await;
        assert!(late.is_none());
        assert_eq!(store.get().await.unwrap().access_token, "T2");
    }

    #[tokio::test]
    async fn mark_stale_only_hits_matching_generation() {
        let store = TokenStore::new();
        let first = store.set(credential("T1", now_millis(), 6600)).await;
        let second = store.set(credential("T2", now_millis(), 6600)).await;

        assert!(!store.mark_stale(first.generation).await);
        assert!(store.get().await.unwrap().is_valid(MARGIN));

        assert!(store.mark_stale(second.generation).await);
        let current = store.get().await.unwrap();
        assert!(current.is_forced_stale());
        assert!(!current.is_valid(MARGIN));
        // Marking does not advance the generation: a refresh can still land
        assert_eq!(store.generation().await, second.generation);
    }

    #[tokio::test]
    async fn clear_if_current_ignores_newer_credential() {
        let store = TokenStore::new();
        let first = store.set(credential("T1", now_millis(), 6600)).await;
        store.set(credential("T2", now_millis(), 6600)).await;

        assert!(!store.clear_if_current(first.generation).await);
        assert!(store.get().await.is_some());

        store.clear().await;
        assert!(store.get().await.is_none());
        assert_eq!(store.generation().await, 3);
    }

    #[tokio::test]
    async fn concurrent_readers_never_see_torn_writes() {
        let store = Arc::new(TokenStore::new());
        store.set(credential("T0", 0, 6600)).await;

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 1..200u64 {
                    store.set(credential(&format!("T{i}"), i, 6600)).await;
                }
            })
        };

        let mut readers = vec![];
        for _ in 0..4 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let cred = store.get().await.unwrap();
                    // Access token and issued_at are always written together
                    assert_eq!(cred.access_token, format!("T{}", cred.issued_at));
                    assert_eq!(cred.refresh_token, Some(format!("refresh-{}", cred.access_token)));
                }
            }));
        }

        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
    }

    #[tokio::test]
    async fn cache_roundtrip_restores_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token-cache.json");

        let store = TokenStore::with_cache(path.clone()).await.unwrap();
        assert!(store.get().await.is_none());
        store.set(credential("T1", 1234, 6600)).await;

        let reloaded = TokenStore::with_cache(path).await.unwrap();
        let cred = reloaded.get().await.unwrap();
        assert_eq!(cred.access_token, "T1");
        assert_eq!(cred.refresh_token.as_deref(), Some("refresh-T1"));
        assert_eq!(cred.issued_at, 1234);
        assert_eq!(cred.generation, 1);
    }

    #[tokio::test]
    async fn cache_clear_persists_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token-cache.json");

        let store = TokenStore::with_cache(path.clone()).await.unwrap();
        store.set(credential("T1", 1234, 6600)).await;
        store.clear().await;

        let reloaded = TokenStore::with_cache(path).await.unwrap();
        assert!(reloaded.get().await.is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token-cache.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = TokenStore::with_cache(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_file_is_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token-cache.json");
        let store = TokenStore::with_cache(path.clone()).await.unwrap();
        store.set(credential("T1", 0, 6600)).await;

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token cache must be 0600, got {mode:o}");
    }
}
