//! REST implementation of the [`RemoteApi`] port.
//!
//! The backend wraps most bodies as `{ success, data: { ... } }` and nests
//! collections under a named field (`data.courses`). Both shapes, and bare
//! bodies, are accepted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use haven_core::auth::TokenStore;
use haven_core::sync::{MutationRequest, RemoteApi};
use haven_domain::{
    ApiConfig, EntityPayload, EntityType, HavenError, HttpMethod, LoginGrant, MutationReceipt,
    Result, HEALTH_PATH, IDEMPOTENCY_HEADER, OUTBOX_ITEM_HEADER,
};
use reqwest::{Method, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use crate::errors::status_error;
use crate::http::HttpClient;

const LOGIN_PATH: &str = "/auth/login";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the learning platform backend.
pub struct RestApiClient {
    http: HttpClient,
    base_url: String,
    tokens: Arc<dyn TokenStore>,
    timeout: Duration,
}

impl RestApiClient {
    /// Fails if `config.base_url` does not parse or the HTTP client cannot
    /// be built.
    pub fn new(config: &ApiConfig, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let timeout = Duration::from_millis(config.request_timeout_ms);
        let http = HttpClient::builder()
            .timeout(timeout)
            .max_attempts(config.max_attempts as usize)
            .user_agent(concat!("haven/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let parsed = url::Url::parse(&config.base_url)
            .map_err(|e| HavenError::Config(format!("invalid api.base_url {}: {e}", config.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HavenError::Config(format!(
                "api.base_url must use http or https, got {}",
                parsed.scheme()
            )));
        }

        Ok(Self { http, base_url: config.base_url.trim_end_matches('/').to_string(), tokens, timeout })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn authorized(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = self.tokens.load_token().await? {
            request = request.bearer_auth(token);
        }
        Ok(request)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        match tokio::time::timeout(self.timeout, self.http.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(HavenError::ServerUnavailable {
                status: None,
                message: format!("no response within {}ms", self.timeout.as_millis()),
            }),
        }
    }

    /// Send the request and return the JSON body of a 2xx response.
    async fn call(&self, request: RequestBuilder) -> Result<(u16, Value)> {
        let response = self.execute(request).await?;
        let status = response.status();
        let code = status.as_u16();
        let text = response.text().await.map_err(|e| HavenError::ServerUnavailable {
            status: Some(code),
            message: format!("failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(status_error(code, error_message(&text, code)));
        }

        if text.trim().is_empty() {
            return Ok((code, Value::Null));
        }
        let body = serde_json::from_str(&text).map_err(|e| HavenError::ServerUnavailable {
            status: Some(code),
            message: format!("malformed JSON response: {e}"),
        })?;
        Ok((code, body))
    }
}

#[async_trait]
impl RemoteApi for RestApiClient {
    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn fetch_entity(&self, entity_type: EntityType, id: &str) -> Result<EntityPayload> {
        let request = self.authorized(Method::GET, &entity_type.entity_path(id)).await?;
        let (_, body) = self.call(request).await?;
        let record = single_record(entity_type, unwrap_data(body));
        EntityPayload::from_json(entity_type, record).map_err(into_payload_error)
    }

    #[instrument(skip(self), fields(entity_type = %entity_type))]
    async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityPayload>> {
        let request = self.authorized(Method::GET, entity_type.collection_path()).await?;
        let (_, body) = self.call(request).await?;
        let records = collection_records(entity_type, unwrap_data(body))?;
        debug!(count = records.len(), "listed entities");

        records
            .into_iter()
            .map(|record| EntityPayload::from_json(entity_type, record).map_err(into_payload_error))
            .collect()
    }

    #[instrument(skip(self, request), fields(item_id = %request.item_id, kind = %request.kind))]
    async fn submit_mutation(&self, request: &MutationRequest) -> Result<MutationReceipt> {
        let method = match request.kind.method() {
            HttpMethod::Post => Method::POST,
            HttpMethod::Patch => Method::PATCH,
        };
        let body = request.payload.body()?;
        let builder = self
            .authorized(method, &request.payload.path(&request.target_entity_id))
            .await?
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .header(OUTBOX_ITEM_HEADER, &request.item_id)
            .json(&body);

        let (status, body) = self.call(builder).await?;
        Ok(MutationReceipt { status, body })
    }

    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant> {
        let request = self
            .http
            .request(Method::POST, self.url(LOGIN_PATH))
            .json(&json!({ "email": email, "password": password }));
        let (_, body) = self.call(request).await?;

        serde_json::from_value(unwrap_data(body)).map_err(|e| HavenError::ServerUnavailable {
            status: None,
            message: format!("unexpected login response: {e}"),
        })
    }

    async fn check_health(&self) -> Result<()> {
        let request = self.http.request(Method::GET, self.url(HEALTH_PATH)).timeout(HEALTH_TIMEOUT);
        let response = self.http.send(request).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            warn!(%status, "health check returned non-success status");
            Err(status_error(status.as_u16(), format!("health check returned {status}")))
        }
    }
}

fn unwrap_data(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get("data").is_some_and(|d| !d.is_null()) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Field name the backend nests a single record under, if any.
fn record_field(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Course => "course",
        EntityType::Job => "job",
        EntityType::Scholarship => "scholarship",
        EntityType::Certificate => "certificate",
        EntityType::Profile => "user",
    }
}

fn single_record(entity_type: EntityType, body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.get(record_field(entity_type)).is_some_and(Value::is_object) => {
            map.remove(record_field(entity_type)).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn collection_records(entity_type: EntityType, body: Value) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            let named = entity_type.collection_path().trim_start_matches('/');
            if let Some(Value::Array(items)) = map.remove(named) {
                return Ok(items);
            }
            map.into_iter()
                .find_map(|(_, value)| match value {
                    Value::Array(items) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| {
                    HavenError::ServerUnavailable {
                        status: None,
                        message: format!("no {named} array in response"),
                    }
                })
        }
        other => Err(HavenError::ServerUnavailable {
            status: None,
            message: format!("expected a collection, got {other}"),
        }),
    }
}

/// A 2xx body that does not match the entity schema is a server fault, not a
/// bad request from us.
fn into_payload_error(err: HavenError) -> HavenError {
    match err {
        HavenError::InvalidPayload(message) | HavenError::Serialization(message) => {
            HavenError::ServerUnavailable { status: None, message: format!("bad entity: {message}") }
        }
        other => other,
    }
}

fn error_message(text: &str, status: u16) -> String {
    serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|body| {
            ["message", "error"]
                .iter()
                .find_map(|field| body.get(*field).and_then(Value::as_str).map(str::to_owned))
        })
        .or_else(|| (!text.trim().is_empty()).then(|| text.trim().to_owned()))
        .unwrap_or_else(|| format!("HTTP {status}"))
}
