//! In-memory [`RemoteApi`] for tests.
//!
//! Behaves like a backend that deduplicates mutations by idempotency key:
//! every request is logged, but a key is applied at most once.

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use haven_domain::{
    EntityPayload, EntityType, HavenError, LoginGrant, MutationReceipt, Result, UserProfile,
};
use parking_lot::Mutex;
use serde_json::json;

use crate::sync::{MutationRequest, RemoteApi};

/// Scripted server behaviour for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockResponse {
    /// Respond with this HTTP status.
    Status(u16),
    /// Connection refused.
    Network,
    /// Never respond.
    Hang,
    /// Apply the mutation, then never respond.
    ApplyThenHang,
}

type SubmitHook = Arc<dyn Fn() + Send + Sync>;

struct Account {
    password: String,
    profile: Option<UserProfile>,
}

struct State {
    entities: HashMap<(EntityType, String), EntityPayload>,
    lists: HashMap<EntityType, Vec<EntityPayload>>,
    script: VecDeque<MockResponse>,
    default_mutation: MockResponse,
    target_failures: HashMap<String, MockResponse>,
    requests: Vec<MutationRequest>,
    applied: Vec<MutationRequest>,
    applied_keys: HashSet<String>,
    read_failure: Option<MockResponse>,
    read_delay: Option<Duration>,
    accounts: HashMap<String, Account>,
    login_failure: Option<MockResponse>,
    healthy: bool,
    fetch_calls: usize,
    list_calls: usize,
    login_calls: usize,
    on_submit: Option<SubmitHook>,
}

pub struct MockRemoteApi {
    state: Mutex<State>,
}

impl Default for MockRemoteApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entities: HashMap::new(),
                lists: HashMap::new(),
                script: VecDeque::new(),
                default_mutation: MockResponse::Status(201),
                target_failures: HashMap::new(),
                requests: Vec::new(),
                applied: Vec::new(),
                applied_keys: HashSet::new(),
                read_failure: None,
                read_delay: None,
                accounts: HashMap::new(),
                login_failure: None,
                healthy: true,
                fetch_calls: 0,
                list_calls: 0,
                login_calls: 0,
                on_submit: None,
            }),
        }
    }

    // ---- setup ----

    pub fn insert_entity(&self, payload: EntityPayload) {
        let key = (payload.entity_type(), payload.id().to_string());
        self.state.lock().entities.insert(key, payload);
    }

    pub fn set_list(&self, entity_type: EntityType, items: Vec<EntityPayload>) {
        self.state.lock().lists.insert(entity_type, items);
    }

    /// Responses consumed in order by the next mutations.
    pub fn script_mutations(&self, responses: impl IntoIterator<Item = MockResponse>) {
        self.state.lock().script.extend(responses);
    }

    /// Response once the script is empty.
    pub fn set_default_mutation_response(&self, response: MockResponse) {
        self.state.lock().default_mutation = response;
    }

    /// Always answer mutations for `target` with `response`.
    pub fn fail_target(&self, target: &str, response: MockResponse) {
        self.state.lock().target_failures.insert(target.to_string(), response);
    }

    /// Fail every read with `response`, or restore normal reads with `None`.
    pub fn set_read_failure(&self, response: Option<MockResponse>) {
        self.state.lock().read_failure = response;
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state.lock().read_delay = delay;
    }

    pub fn add_account(&self, email: &str, password: &str, profile: Option<UserProfile>) {
        self.state
            .lock()
            .accounts
            .insert(email.to_string(), Account { password: password.to_string(), profile });
    }

    pub fn set_login_failure(&self, response: Option<MockResponse>) {
        self.state.lock().login_failure = response;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Run `hook` at the start of every mutation request.
    pub fn on_submit(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.state.lock().on_submit = Some(Arc::new(hook));
    }

    // ---- inspection ----

    pub fn submit_calls(&self) -> usize {
        self.state.lock().requests.len()
    }

    pub fn submitted(&self) -> Vec<MutationRequest> {
        self.state.lock().requests.clone()
    }

    pub fn submitted_targets(&self) -> Vec<String> {
        self.state.lock().requests.iter().map(|r| r.target_entity_id.clone()).collect()
    }

    /// Mutations the server actually applied, one per idempotency key.
    pub fn applied(&self) -> Vec<MutationRequest> {
        self.state.lock().applied.clone()
    }

    pub fn effect_count(&self) -> usize {
        self.state.lock().applied.len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.state.lock().fetch_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn login_calls(&self) -> usize {
        self.state.lock().login_calls
    }

    async fn before_read(&self) -> Result<()> {
        let (failure, delay) = {
            let state = self.state.lock();
            (state.read_failure.clone(), state.read_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(response) => respond(response).await.map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Turn a scripted response into the error a real client would produce.
async fn respond(response: MockResponse) -> Result<u16> {
    match response {
        MockResponse::Status(status) if (200..300).contains(&status) => Ok(status),
        MockResponse::Status(status) if (400..500).contains(&status) => {
            Err(HavenError::ServerRejected { status, message: format!("mock {status}") })
        }
        MockResponse::Status(status) => Err(HavenError::ServerUnavailable {
            status: Some(status),
            message: format!("mock {status}"),
        }),
        MockResponse::Network => Err(HavenError::NetworkUnavailable("connection refused".into())),
        MockResponse::Hang | MockResponse::ApplyThenHang => {
            std::future::pending::<()>().await;
            Err(HavenError::Internal("unreachable".into()))
        }
    }
}

#[async_trait]
impl RemoteApi for MockRemoteApi {
    async fn fetch_entity(&self, entity_type: EntityType, id: &str) -> Result<EntityPayload> {
        self.state.lock().fetch_calls += 1;
        self.before_read().await?;
        self.state
            .lock()
            .entities
            .get(&(entity_type, id.to_string()))
            .cloned()
            .ok_or_else(|| HavenError::ServerRejected {
                status: 404,
                message: format!("{entity_type} {id} not found"),
            })
    }

    async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<EntityPayload>> {
        self.state.lock().list_calls += 1;
        self.before_read().await?;
        Ok(self.state.lock().lists.get(&entity_type).cloned().unwrap_or_default())
    }

    async fn submit_mutation(&self, request: &MutationRequest) -> Result<MutationReceipt> {
        let hook = self.state.lock().on_submit.clone();
        if let Some(hook) = hook {
            hook();
        }

        let response = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            let response = match state.target_failures.get(&request.target_entity_id) {
                Some(response) => response.clone(),
                None => match state.script.pop_front() {
                    Some(response) => response,
                    None => state.default_mutation.clone(),
                },
            };
            let applies = matches!(response, MockResponse::ApplyThenHang)
                || matches!(response, MockResponse::Status(s) if (200..300).contains(&s));
            if applies && state.applied_keys.insert(request.idempotency_key.clone()) {
                state.applied.push(request.clone());
            }
            response
        };

        let status = respond(response).await?;
        Ok(MutationReceipt { status, body: json!({ "id": request.target_entity_id }) })
    }

    async fn login(&self, email: &str, password: &str) -> Result<LoginGrant> {
        let failure = {
            let mut state = self.state.lock();
            state.login_calls += 1;
            state.login_failure.clone()
        };
        if let Some(response) = failure {
            respond(response).await?;
        }

        let state = self.state.lock();
        match state.accounts.get(email) {
            Some(account) if account.password == password => Ok(LoginGrant {
                access_token: format!("token-for-{email}"),
                profile: account.profile.clone(),
            }),
            _ => Err(HavenError::ServerRejected {
                status: 401,
                message: "Invalid credentials".into(),
            }),
        }
    }

    async fn check_health(&self) -> Result<()> {
        if self.state.lock().healthy {
            Ok(())
        } else {
            Err(HavenError::NetworkUnavailable("health check failed".into()))
        }
    }
}
