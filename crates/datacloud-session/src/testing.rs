//! Mock identity provider and browser shared by the unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::Form;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use datacloud_auth::{Browser, ClientRegistration, Credential, now_millis};
use tokio::net::TcpListener;
use url::Url;

type Captured = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Token endpoint answering queued replies in order; 500 once the queue is empty.
pub(crate) struct MockIdp {
    pub base: String,
    requests: Captured,
}

impl MockIdp {
    pub async fn start(replies: Vec<(u16, &str)>, delay: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests: Captured = Arc::new(Mutex::new(Vec::new()));
        let queue: Arc<Mutex<VecDeque<(StatusCode, String)>>> = Arc::new(Mutex::new(
            replies
                .into_iter()
                .map(|(status, body)| (StatusCode::from_u16(status).unwrap(), body.to_string()))
                .collect(),
        ));

        let sink = requests.clone();
        let app = axum::Router::new().route(
            "/services/oauth2/token",
            axum::routing::post(move |Form(form): Form<HashMap<String, String>>| {
                let sink = sink.clone();
                let queue = queue.clone();
                async move {
                    sink.lock().unwrap().push(form);
                    let reply = queue.lock().unwrap().pop_front();
                    tokio::time::sleep(delay).await;
                    let (status, body) = reply.unwrap_or((
                        StatusCode::INTERNAL_SERVER_ERROR,
                        r#"{"error":"unexpected_request"}"#.to_string(),
                    ));
                    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<HashMap<String, String>> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// Plays the user: follows the authorization URL straight to the redirect.
pub(crate) struct RedirectingBrowser {
    code: String,
    forced_state: Option<String>,
    opened: Mutex<Vec<String>>,
}

impl RedirectingBrowser {
    pub fn new(code: &str) -> Arc<Self> {
        Arc::new(Self {
            code: code.to_string(),
            forced_state: None,
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn with_state(code: &str, state: &str) -> Arc<Self> {
        Arc::new(Self {
            code: code.to_string(),
            forced_state: Some(state.to_string()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl Browser for RedirectingBrowser {
    fn open(&self, url: &str) -> std::io::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        let params: HashMap<String, String> =
            Url::parse(url).unwrap().query_pairs().into_owned().collect();
        let state = self
            .forced_state
            .clone()
            .unwrap_or_else(|| params["state"].clone());
        let mut redirect = Url::parse(&params["redirect_uri"]).unwrap();
        redirect
            .query_pairs_mut()
            .append_pair("code", &self.code)
            .append_pair("state", &state);
        tokio::spawn(async move {
            let _ = reqwest::get(redirect).await;
        });
        Ok(())
    }
}

pub(crate) fn registration(login_base: &str) -> ClientRegistration {
    ClientRegistration::new(
        "client-id",
        "client-secret",
        login_base,
        "http://127.0.0.1:0/Callback",
    )
}

pub(crate) fn valid_credential(access: &str, instance_url: &str) -> Credential {
    Credential::new(access, Some("R1".into()), instance_url, now_millis(), 6600)
}

pub(crate) fn expired_credential(access: &str, instance_url: &str) -> Credential {
    Credential::new(
        access,
        Some("R1".into()),
        instance_url,
        now_millis() - 7_000_000,
        6600,
    )
}
