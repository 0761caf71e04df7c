//! Salesforce OAuth authentication library
//!
//! Provides the building blocks of the Authorization Code + PKCE login used by
//! the Data Cloud bridge: client registration, PKCE/state generation, the
//! single-shot callback listener, token endpoint calls, and the token store.
//! Orchestration (single-flight login, refresh fallback, 401 handling) lives
//! in `datacloud-session`.
//!
//! Interactive login:
//! 1. `CallbackListener::bind()` claims the redirect port
//! 2. `pkce::PkcePair::generate()` + `pkce::generate_state()` for this attempt
//! 3. `pkce::build_authorization_url()` is opened through a `Browser`
//! 4. `CallbackListener::wait_for_code()` captures the code, checking `state`
//! 5. `TokenClient::exchange_code()` redeems it with the verifier
//! 6. The resulting `Credential` is installed in the `TokenStore`

pub mod browser;
pub mod callback;
pub mod constants;
pub mod error;
pub mod pkce;
pub mod registration;
pub mod store;
pub mod token;

pub use browser::{Browser, SystemBrowser};
pub use callback::{AuthorizationResult, CallbackListener};
pub use constants::*;
pub use error::{Error, Result};
pub use pkce::{PkcePair, build_authorization_url, generate_state};
pub use registration::ClientRegistration;
pub use store::{Credential, TokenStore, now_millis};
pub use token::{TokenClient, TokenResponse};
