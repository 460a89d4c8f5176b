//! Authenticated HTTP session shared by the service clients

use crate::error::{CaveError, CaveResult};
use reqwest::header::WARNING;
use reqwest::{redirect, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Default per-request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A `reqwest` client carrying the bearer token.
///
/// Redirects are not followed: the services answer an unauthenticated
/// request by redirecting to a login page, which is reported as
/// [`CaveError::Unauthorized`].
#[derive(Clone)]
pub struct Session {
    http: Client,
    token: Option<String>,
}

impl Session {
    pub fn new(token: Option<String>, timeout: Duration) -> CaveResult<Self> {
        let http = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .user_agent(concat!("caveclient-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, token })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Start a request with the auth header attached
    pub fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let request = self.http.request(method, url);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and map failure statuses onto [`CaveError`]
    pub async fn send(&self, request: RequestBuilder) -> CaveResult<Response> {
        let response = request.send().await?;
        debug!(url = %response.url(), status = response.status().as_u16(), "response");
        log_warnings(&response);
        check_status(response).await
    }

    /// Send a request and decode its JSON body
    pub async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> CaveResult<T> {
        let response = self.send(request).await?;
        decode_json(response).await
    }

    /// Send a request and return its raw body
    pub async fn bytes(&self, request: RequestBuilder) -> CaveResult<Vec<u8>> {
        let response = self.send(request).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Pick the API version to use for a service.
    ///
    /// A pinned version is used as-is when this client supports it.
    /// Otherwise the server is asked which versions it offers and the highest
    /// common one wins. A server that cannot list its versions gets the
    /// highest version this client knows.
    pub async fn negotiate(
        &self,
        service: &str,
        versions_url: Url,
        supported: &[u32],
        pinned: Option<u32>,
    ) -> CaveResult<u32> {
        if let Some(version) = pinned {
            if supported.contains(&version) {
                return Ok(version);
            }
            return Err(CaveError::IncompatibleVersion {
                service: service.to_string(),
                client: supported.to_vec(),
                server: vec![version],
            });
        }

        let offered: Vec<u32> = match self.json(self.request(Method::GET, versions_url)).await {
            Ok(offered) => offered,
            Err(err @ CaveError::Unauthorized { .. }) => return Err(err),
            Err(err) => {
                warn!(service, error = %err, "could not list API versions; assuming latest");
                return supported.iter().copied().max().ok_or_else(|| {
                    CaveError::IncompatibleVersion {
                        service: service.to_string(),
                        client: Vec::new(),
                        server: Vec::new(),
                    }
                });
            }
        };
        select_version(service, supported, &offered)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// Highest version offered by both sides
pub fn select_version(service: &str, supported: &[u32], offered: &[u32]) -> CaveResult<u32> {
    supported
        .iter()
        .copied()
        .filter(|v| offered.contains(v))
        .max()
        .ok_or_else(|| CaveError::IncompatibleVersion {
            service: service.to_string(),
            client: supported.to_vec(),
            server: offered.to_vec(),
        })
}

fn log_warnings(response: &Response) {
    for value in response.headers().get_all(WARNING) {
        if let Ok(text) = value.to_str() {
            warn!(url = %response.url(), "{text}");
        }
    }
}

async fn check_status(response: Response) -> CaveResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    if status.is_redirection()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
    {
        return Err(CaveError::Unauthorized { url });
    }
    if status == StatusCode::NOT_FOUND {
        return Err(CaveError::NotFound { url });
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    let status = status.as_u16();
    if (400..500).contains(&status) {
        Err(CaveError::BadRequest { status, url, message })
    } else {
        Err(CaveError::ServerError { status, url, message })
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> CaveResult<T> {
    let url = response.url().to_string();
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| CaveError::Decode(format!("{url}: {e}")))
}

/// The `message` field of a JSON error body, or the body itself
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
