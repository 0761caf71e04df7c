//! Single-shot local listener for the OAuth redirect
//!
//! Bound before the browser is opened so the redirect can never race the
//! bind. Serves exactly one request on the registered callback path, then
//! shuts down. The socket is released on every exit path: success, state
//! mismatch, provider error, timeout, or the future being dropped.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::{Host, Url};

use crate::error::{Error, Result};

/// How long in-flight callback responses get to finish after the result is in.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Authorization code and state captured from the redirect. Consumed once by
/// the code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    pub state: String,
}

/// A bound, not yet serving, callback listener.
pub struct CallbackListener {
    listener: TcpListener,
    path: String,
    redirect_uri: String,
    timeout: Duration,
}

impl CallbackListener {
    /// Bind the host/port of `callback_url`.
    ///
    /// `localhost` binds the IPv4 loopback. Port 0 binds an ephemeral port;
    /// [`redirect_uri`](Self::redirect_uri) then reports the bound port.
    pub async fn bind(callback_url: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(callback_url)
            .map_err(|e| Error::Registration(format!("invalid callback_url: {e}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| Error::Registration("callback_url has no usable port".into()))?;
        let host = match url.host() {
            Some(Host::Domain(domain)) if domain.eq_ignore_ascii_case("localhost") => {
                "127.0.0.1".to_string()
            }
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(Error::Registration("callback_url has no host".into())),
        };

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| Error::Callback(format!("cannot bind {host}:{port}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::Callback(format!("reading bound address: {e}")))?;

        let redirect_uri = if port == 0 {
            let mut effective = url.clone();
            effective
                .set_port(Some(local.port()))
                .map_err(|_| Error::Callback("cannot set port on callback_url".into()))?;
            effective.to_string()
        } else {
            // Must stay byte-identical to what is registered on the connected app
            callback_url.to_string()
        };

        info!(addr = %local, path = url.path(), "callback listener bound");
        Ok(Self {
            listener,
            path: url.path().to_string(),
            redirect_uri,
            timeout,
        })
    }

    /// Redirect URI to put on the authorization URL and the code exchange.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| Error::Callback(format!("reading bound address: {e}")))
    }

    /// Serve until one redirect arrives on the callback path or the timeout fires.
    pub async fn wait_for_code(self, expected_state: &str) -> Result<AuthorizationResult> {
        let Self {
            listener,
            path,
            timeout,
            ..
        } = self;

        let (result_tx, result_rx) = oneshot::channel();
        let app = callback_router(CallbackState {
            path: Arc::from(path.as_str()),
            expected_state: Arc::from(expected_state),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let mut server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        let outcome = match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Callback("callback handler dropped".into())),
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "no OAuth callback received");
                Err(Error::Timeout(timeout))
            }
        };

        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
            Ok(Ok(Ok(()))) => debug!("callback listener closed"),
            Ok(Ok(Err(e))) => warn!(error = %e, "callback listener error during shutdown"),
            Ok(Err(e)) => warn!(error = %e, "callback listener task failed"),
            Err(_) => {
                debug!("callback connections still open after grace period, aborting");
                server.abort();
            }
        }

        outcome
    }
}

#[derive(Clone)]
struct CallbackState {
    path: Arc<str>,
    expected_state: Arc<str>,
    result_tx: Arc<Mutex<Option<oneshot::Sender<Result<AuthorizationResult>>>>>,
}

fn callback_router(state: CallbackState) -> Router {
    Router::new().fallback(handle_callback).with_state(state)
}

/// Matches the path case-sensitively: the registered callback URL must match
/// exactly, and a stray request (favicon, typo) must not consume the attempt.
async fn handle_callback(
    State(state): State<CallbackState>,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if uri.path() != &*state.path {
        debug!(path = uri.path(), "ignoring request outside callback path");
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }

    let Some(result_tx) = state
        .result_tx
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .take()
    else {
        return (StatusCode::GONE, "This login attempt has already completed.").into_response();
    };

    let outcome = evaluate(&params, &state.expected_state);
    let (status, body) = match &outcome {
        Ok(_) => (
            StatusCode::OK,
            "Login complete. You can close this window now.".to_string(),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            format!("Login failed: {e}\nYou can close this window now."),
        ),
    };
    let _ = result_tx.send(outcome);

    (
        status,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CONNECTION, "close"),
        ],
        body,
    )
        .into_response()
}

fn evaluate(params: &HashMap<String, String>, expected_state: &str) -> Result<AuthorizationResult> {
    let state = params.get("state").map(String::as_str).unwrap_or_default();
    if state != expected_state {
        return Err(Error::StateMismatch);
    }

    if let Some(error) = params.get("error") {
        let message = match params.get("error_description") {
            Some(description) => format!("{error} - {description}"),
            None => error.clone(),
        };
        return Err(Error::Denied(message));
    }

    let code = params
        .get("code")
        .filter(|code| !code.is_empty())
        .ok_or_else(|| Error::Denied("callback carried no authorization code".into()))?;

    Ok(AuthorizationResult {
        code: code.clone(),
        state: state.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn bind_ephemeral(timeout: Duration) -> CallbackListener {
        CallbackListener::bind("http://127.0.0.1:0/Callback", timeout)
            .await
            .unwrap()
    }

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn evaluate_accepts_matching_state() {
        let result = evaluate(&params(&[("code", "ABC"), ("state", "S1")]), "S1").unwrap();
        assert_eq!(result.code, "ABC");
        assert_eq!(result.state, "S1");
    }

    #[test]
    fn evaluate_rejects_missing_or_wrong_state() {
        assert!(matches!(
            evaluate(&params(&[("code", "ABC"), ("state", "S2")]), "S1"),
            Err(Error::StateMismatch)
        ));
        assert!(matches!(
            evaluate(&params(&[("code", "ABC")]), "S1"),
            Err(Error::StateMismatch)
        ));
    }

    #[test]
    fn evaluate_reports_provider_error() {
        let err = evaluate(
            &params(&[
                ("error", "access_denied"),
                ("error_description", "end-user denied authorization"),
                ("state", "S1"),
            ]),
            "S1",
        )
        .unwrap_err();
        match err {
            Error::Denied(msg) => assert_eq!(msg, "access_denied - end-user denied authorization"),
            other => panic!("expected Denied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redirect_uri_reports_bound_port() {
        let listener = bind_ephemeral(Duration::from_secs(1)).await;
        let port = listener.local_addr().unwrap().port();
        assert_ne!(port, 0);
        assert_eq!(
            listener.redirect_uri(),
            format!("http://127.0.0.1:{port}/Callback")
        );
    }

    #[tokio::test]
    async fn fixed_port_redirect_is_passed_through_verbatim() {
        // Bind an ephemeral port to find a free one, then release it
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let url = format!("http://localhost:{port}/Callback");
        let listener = CallbackListener::bind(&url, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(listener.redirect_uri(), url);
        assert_eq!(listener.local_addr().unwrap().ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn captures_code_when_state_matches() {
        let listener = bind_ephemeral(Duration::from_secs(5)).await;
        let redirect = listener.redirect_uri().to_string();
        let waiter = tokio::spawn(async move { listener.wait_for_code("S1").await });

        let response = reqwest::get(format!("{redirect}?code=ABC&state=S1"))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body = response.text().await.unwrap();
        assert!(body.contains("close this window"), "got: {body}");

        let result = waiter.await.unwrap().unwrap();
        assert_eq!(
            result,
            AuthorizationResult {
                code: "ABC".into(),
                state: "S1".into()
            }
        );
    }

    #[tokio::test]
    async fn state_mismatch_aborts_and_releases_port() {
        let listener = bind_ephemeral(Duration::from_secs(5)).await;
        let addr = listener.local_addr().unwrap();
        let redirect = listener.redirect_uri().to_string();
        let waiter = tokio::spawn(async move { listener.wait_for_code("S1").await });

        let response = reqwest::get(format!("{redirect}?code=ABC&state=forged"))
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::StateMismatch), "got {err:?}");

        // Socket must be free again for the next attempt
        let rebound = TcpListener::bind(addr).await;
        assert!(rebound.is_ok(), "callback port was not released");
    }

    #[tokio::test]
    async fn times_out_without_redirect() {
        let listener = bind_ephemeral(Duration::from_millis(100)).await;
        let addr = listener.local_addr().unwrap();

        let err = listener.wait_for_code("S1").await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
        assert!(TcpListener::bind(addr).await.is_ok(), "port not released after timeout");
    }

    #[tokio::test]
    async fn stray_requests_do_not_consume_the_attempt() {
        let listener = bind_ephemeral(Duration::from_secs(5)).await;
        let addr = listener.local_addr().unwrap();
        let waiter = tokio::spawn(async move { listener.wait_for_code("S1").await });

        let favicon = reqwest::get(format!("http://{addr}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), 404);
        // Path matching is case-sensitive
        let lowercase = reqwest::get(format!("http://{addr}/callback?code=X&state=S1"))
            .await
            .unwrap();
        assert_eq!(lowercase.status(), 404);

        let ok = reqwest::get(format!("http://{addr}/Callback?code=ABC&state=S1"))
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(waiter.await.unwrap().unwrap().code, "ABC");
    }

    #[tokio::test]
    async fn provider_denial_surfaces_as_denied() {
        let listener = bind_ephemeral(Duration::from_secs(5)).await;
        let redirect = listener.redirect_uri().to_string();
        let waiter = tokio::spawn(async move { listener.wait_for_code("S1").await });

        let response = reqwest::get(format!(
            "{redirect}?error=access_denied&error_description=user%20denied&state=S1"
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), 400);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Denied(ref m) if m.contains("user denied")), "got {err:?}");
    }

    #[tokio::test]
    async fn router_answers_gone_once_result_taken() {
        let (tx, _rx) = oneshot::channel();
        let state = CallbackState {
            path: Arc::from("/Callback"),
            expected_state: Arc::from("S1"),
            result_tx: Arc::new(Mutex::new(Some(tx))),
        };
        let app = callback_router(state);

        let first = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/Callback?code=ABC&state=S1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first.headers().get(header::CONNECTION).unwrap(),
            "close"
        );

        let second = app
            .oneshot(
                Request::builder()
                    .uri("/Callback?code=ABC&state=S1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::GONE);
    }
}
