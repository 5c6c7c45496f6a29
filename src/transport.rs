use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{ClientError, ClientResult};

pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// JSON-over-HTTP calls against the service. Paths are relative to the base
/// URL (`/prediction`, `/status/<id>`, ...).
pub trait Transport {
    fn post_json(&self, path: &str, payload: &Value) -> ClientResult<Value>;
    fn get_json(&self, path: &str) -> ClientResult<Value>;
}

pub struct HttpTransport {
    client: HttpClient,
    base_url: String,
    auth_key: Option<String>,
}

impl HttpTransport {
    pub fn new(credentials: &Credentials, timeout: Duration) -> ClientResult<Self> {
        let client = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: credentials.base_url.trim_end_matches('/').to_string(),
            auth_key: credentials.auth_key.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    // Both headers go out because deployed gateways differ in which one they check.
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth_key.as_deref() {
            Some(key) => request
                .header(reqwest::header::AUTHORIZATION, format!("Bearer {key}"))
                .header(SUBSCRIPTION_KEY_HEADER, key),
            None => request,
        }
    }

    fn read_json(url: &str, response: Response) -> ClientResult<Value> {
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            tracing::warn!(%url, status = %status, "request rejected");
            return Err(ClientError::Transport { status, body });
        }
        serde_json::from_str(&body)
            .map_err(|err| ClientError::malformed(format!("{url} returned non-JSON body: {err}")))
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, path: &str, payload: &Value) -> ClientResult<Value> {
        let url = self.url(path);
        tracing::debug!(%url, "POST");
        let body = serde_json::to_vec(payload)?;
        let request = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body);
        let response = self.authorize(request).send()?;
        Self::read_json(&url, response)
    }

    fn get_json(&self, path: &str) -> ClientResult<Value> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");
        let response = self.authorize(self.client.get(&url)).send()?;
        Self::read_json(&url, response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serve;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Seen {
        headers: Mutex<Vec<HeaderMap>>,
        bodies: Mutex<Vec<Value>>,
    }

    async fn record_prediction(
        State(seen): State<Arc<Seen>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        seen.headers.lock().unwrap().push(headers);
        seen.bodies.lock().unwrap().push(body);
        let reply = json!({"response": {"session_id": "abc"}});
        (StatusCode::ACCEPTED, Json(reply))
    }

    async fn record_status(
        State(seen): State<Arc<Seen>>,
        Path(session_id): Path<String>,
        headers: HeaderMap,
    ) -> Json<Value> {
        seen.headers.lock().unwrap().push(headers);
        Json(json!({"status": "running", "session_id": session_id}))
    }

    fn transport(base_url: &str, auth_key: Option<&str>) -> HttpTransport {
        HttpTransport::new(
            &Credentials {
                base_url: base_url.to_string(),
                auth_key: auth_key.map(str::to_string),
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn post_sends_json_with_both_auth_headers() {
        let seen = Arc::new(Seen::default());
        let router = Router::new()
            .route("/prediction", post(record_prediction))
            .with_state(seen.clone());
        let base = serve(router);

        let response = transport(&base, Some("secret"))
            .post_json("/prediction", &json!({"data": null}))
            .unwrap();
        assert_eq!(response["response"]["session_id"], "abc");

        let headers = seen.headers.lock().unwrap();
        assert_eq!(headers[0]["authorization"], "Bearer secret");
        assert_eq!(headers[0]["ocp-apim-subscription-key"], "secret");
        assert_eq!(headers[0]["content-type"], "application/json");
        assert_eq!(seen.bodies.lock().unwrap()[0], json!({"data": null}));
    }

    #[test]
    fn anonymous_calls_carry_no_auth_headers() {
        let seen = Arc::new(Seen::default());
        let router = Router::new()
            .route("/status/{session_id}", get(record_status))
            .with_state(seen.clone());
        let base = serve(router);

        let response = transport(&format!("{base}/"), None)
            .get_json("status/s-9")
            .unwrap();
        assert_eq!(
            response,
            json!({"status": "running", "session_id": "s-9"})
        );
        let headers = seen.headers.lock().unwrap();
        assert!(headers[0].get("authorization").is_none());
        assert!(headers[0].get("ocp-apim-subscription-key").is_none());
    }

    #[test]
    fn non_success_status_surfaces_code_and_body() {
        let router = Router::new().route(
            "/result/{session_id}",
            get(|| async { (StatusCode::UNAUTHORIZED, "invalid subscription key") }),
        );
        let base = serve(router);

        let err = transport(&base, Some("wrong"))
            .get_json("/result/x")
            .unwrap_err();
        match err {
            ClientError::Transport { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED.as_u16());
                assert_eq!(body, "invalid subscription key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn absolute_urls_bypass_base() {
        let t = transport("http://localhost:8004", None);
        assert_eq!(t.url("/prediction"), "http://localhost:8004/prediction");
        assert_eq!(t.url("https://other/x"), "https://other/x");
    }
}
