//! Thin reqwest wrapper shared by the REST client.
//!
//! Reads may retry a few times inline when configured to. Mutations never
//! do: they go out once and any further delivery belongs to the outbox,
//! which tracks attempts and backoff durably.

use std::time::Duration;

use haven_domain::{HavenError, Result, DEFAULT_REQUEST_TIMEOUT_MS};
use reqwest::{Client as ReqwestClient, Method, Request, RequestBuilder, Response};
use tracing::debug;

use crate::errors::InfraError;

const DEFAULT_READ_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF_SHIFT: u32 = 6;

#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    read_attempts: usize,
    read_backoff: Duration,
}

impl HttpClient {
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Send a request and hand back whatever the server answered.
    ///
    /// Non-2xx statuses are not errors here. Transport failures map to
    /// `NetworkUnavailable`, timeouts to `ServerUnavailable` without a status.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let mut request = builder.build().map_err(to_haven)?;
        let attempts = if request.method().is_safe() { self.read_attempts } else { 1 };

        let mut attempt = 1;
        loop {
            let spare = if attempt < attempts { request.try_clone() } else { None };
            let outcome = self.execute(request, attempt).await;
            let Some(next) = spare else {
                return outcome.map_err(to_haven);
            };

            match outcome {
                Ok(response) if !response.status().is_server_error() => return Ok(response),
                Err(err) if !is_transient(&err) => return Err(to_haven(err)),
                _ => {}
            }
            self.pause(attempt).await;
            request = next;
            attempt += 1;
        }
    }

    async fn execute(&self, request: Request, attempt: usize) -> reqwest::Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(attempt, %method, %url, "sending HTTP request");

        let result = self.client.execute(request).await;
        match &result {
            Ok(response) => debug!(attempt, %method, %url, status = %response.status(), "HTTP response"),
            Err(err) => debug!(attempt, %method, %url, error = %err, "HTTP request failed"),
        }
        result
    }

    async fn pause(&self, attempt: usize) {
        let shift = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(MAX_BACKOFF_SHIFT);
        let delay = self.read_backoff.saturating_mul(1 << shift);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn to_haven(err: reqwest::Error) -> HavenError {
    InfraError::from(err).into()
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    read_attempts: usize,
    read_backoff: Duration,
    user_agent: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            read_attempts: 1,
            read_backoff: DEFAULT_READ_BACKOFF,
            user_agent: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total attempts for GET/HEAD requests. Mutations always get one.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.read_attempts = attempts.max(1);
        self
    }

    pub fn read_backoff(mut self, backoff: Duration) -> Self {
        self.read_backoff = backoff;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout);
        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }
        let client = builder.build().map_err(to_haven)?;

        Ok(HttpClient { client, read_attempts: self.read_attempts, read_backoff: self.read_backoff })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use reqwest::StatusCode;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn retrying_client() -> HttpClient {
        HttpClient::builder()
            .read_backoff(Duration::from_millis(5))
            .max_attempts(3)
            .build()
            .expect("http client")
    }

    #[tokio::test]
    async fn reads_retry_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let client = retrying_client();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mutations_are_sent_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = retrying_client();
        let response = client
            .send(client.request(Method::POST, server.uri()).body("{}"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn client_errors_are_returned_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = retrying_client();
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn refused_connection_is_network_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = retrying_client();
        let result = client.send(client.request(Method::GET, format!("http://{addr}"))).await;
        assert!(matches!(result, Err(HavenError::NetworkUnavailable(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn slow_response_times_out_as_server_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client =
            HttpClient::builder().timeout(Duration::from_millis(50)).build().expect("http client");
        let result = client.send(client.request(Method::GET, server.uri())).await;
        assert!(matches!(result, Err(HavenError::ServerUnavailable { status: None, .. })));
    }
}
