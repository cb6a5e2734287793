//! HTTP backend for a PocketBase server.
//!
//! Records go through the collection REST API; live changes come from the
//! realtime endpoint, a Server-Sent Events stream:
//!
//! ```text
//!   GET  /api/realtime                    ──▶  event: PB_CONNECT  data: {"clientId": ...}
//!   POST /api/realtime {clientId, subscriptions: ["ideas/*"]}
//!                                         ──▶  event: ideas/*     data: {"action", "record"}
//! ```
//!
//! The auth token from `auth-with-password` is held here and sent as the
//! `Authorization` header. A 401 while holding a token means it expired: the
//! token is dropped and [`AuthEvent::Invalidated`] is published.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use ideavault_types::{Idea, IdeaFields, IdeaId, Identity, UserId};
use parking_lot::Mutex;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::backend::{RemoteResult, VaultBackend};
use crate::config::ClientConfig;
use crate::constants::{AUTH_EVENT_CAPACITY, LIST_PAGE_SIZE, LIST_SORT, OWNER_FIELD, SUBSCRIPTION_BUFFER};
use crate::error::RemoteError;
use crate::sse::{SseDecoder, SseEvent};
use crate::subscriptions::{AuthEvent, ChangeEvent, Subscription, SubscriptionSink};

const CONNECT_EVENT: &str = "PB_CONNECT";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct PasswordAuth<'a> {
    identity: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
    record: Identity,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewUser<'a> {
    email: &'a str,
    password: &'a str,
    password_confirm: &'a str,
}

#[derive(Serialize)]
struct NewIdea<'a> {
    #[serde(flatten)]
    fields: &'a IdeaFields,
    user: &'a UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    page: u32,
    total_pages: u32,
    items: Vec<Idea>,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectPayload {
    client_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeSubscriptions<'a> {
    client_id: &'a str,
    subscriptions: Vec<String>,
}

fn transport(err: reqwest::Error) -> RemoteError {
    RemoteError::transport(err.to_string())
}

// ============================================================================
// Backend
// ============================================================================

/// [`VaultBackend`] over a PocketBase server.
pub struct PocketBaseBackend {
    http: reqwest::Client,
    api_root: String,
    users: String,
    ideas: String,
    timeout: Duration,
    token: Mutex<Option<String>>,
    auth_tx: broadcast::Sender<AuthEvent>,
}

impl std::fmt::Debug for PocketBaseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PocketBaseBackend")
            .field("api_root", &self.api_root)
            .field("authenticated", &self.token.lock().is_some())
            .finish()
    }
}

impl PocketBaseBackend {
    pub fn new(config: &ClientConfig) -> RemoteResult<Self> {
        let timeout = config.request_timeout();
        // No client-wide timeout: it would also cut off the realtime stream.
        let http = reqwest::Client::builder().connect_timeout(timeout).build().map_err(transport)?;
        let (auth_tx, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        info!(url = %config.api_root(), "Using PocketBase backend");
        Ok(Self {
            http,
            api_root: config.api_root().to_string(),
            users: config.users_collection.clone(),
            ideas: config.ideas_collection.clone(),
            timeout,
            token: Mutex::new(None),
            auth_tx,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.api_root)
    }

    fn records_url(&self, collection: &str) -> String {
        self.url(&format!("collections/{collection}/records"))
    }

    fn idea_url(&self, id: &IdeaId) -> String {
        format!("{}/{id}", self.records_url(&self.ideas))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self.token.lock().clone();
        match token {
            Some(token) => request.header(AUTHORIZATION, token),
            None => request,
        }
    }

    /// Send with auth and timeout; non-2xx becomes a [`RemoteError`].
    async fn execute(&self, request: RequestBuilder) -> RemoteResult<Response> {
        let had_token = self.token.lock().is_some();
        let response = self.authorize(request).timeout(self.timeout).send().await.map_err(transport)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.error_from(response, had_token).await)
    }

    async fn execute_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> RemoteResult<T> {
        self.execute(request).await?.json().await.map_err(transport)
    }

    async fn error_from(&self, response: Response, had_token: bool) -> RemoteError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|body| body.message)
            .ok()
            .filter(|message| !message.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        if status == StatusCode::UNAUTHORIZED && had_token {
            self.token.lock().take();
            warn!(%message, "Auth token rejected, dropping it");
            let _ = self.auth_tx.send(AuthEvent::Invalidated { reason: message.clone() });
        }
        RemoteError::new(status.as_u16(), message)
    }

    fn realtime_topic(&self) -> String {
        format!("{}/*", self.ideas)
    }
}

fn owner_filter(owner: &UserId) -> String {
    format!("({OWNER_FIELD}=\"{}\")", owner.as_str().replace('"', "\\\""))
}

#[async_trait]
impl VaultBackend for PocketBaseBackend {
    async fn authenticate(&self, email: &str, password: &str) -> RemoteResult<Identity> {
        let url = self.url(&format!("collections/{}/auth-with-password", self.users));
        let request = self.http.post(url).json(&PasswordAuth { identity: email, password });
        let auth: AuthResponse = self.execute_json(request).await?;
        *self.token.lock() = Some(auth.token);
        debug!(user = %auth.record.id, "Authenticated");
        Ok(auth.record)
    }

    async fn create_identity(
        &self,
        email: &str,
        password: &str,
        password_confirm: &str,
    ) -> RemoteResult<Identity> {
        let request = self
            .http
            .post(self.records_url(&self.users))
            .json(&NewUser { email, password, password_confirm });
        self.execute_json(request).await
    }

    fn invalidate_session(&self) {
        self.token.lock().take();
    }

    async fn list_owned(&self, owner: &UserId) -> RemoteResult<Vec<Idea>> {
        let filter = owner_filter(owner);
        let mut ideas = Vec::new();
        let mut page = 1;
        loop {
            let request = self.http.get(self.records_url(&self.ideas)).query(&[
                ("page", page.to_string()),
                ("perPage", LIST_PAGE_SIZE.to_string()),
                ("sort", LIST_SORT.to_string()),
                ("filter", filter.clone()),
            ]);
            let batch: ListPage = self.execute_json(request).await?;
            trace!(page = batch.page, total = batch.total_pages, items = batch.items.len(), "Fetched page");
            let done = batch.items.is_empty() || batch.page >= batch.total_pages;
            ideas.extend(batch.items);
            if done {
                break;
            }
            page += 1;
        }
        Ok(ideas)
    }

    async fn create_record(&self, fields: &IdeaFields, owner: &UserId) -> RemoteResult<Idea> {
        let request = self
            .http
            .post(self.records_url(&self.ideas))
            .json(&NewIdea { fields, user: owner });
        self.execute_json(request).await
    }

    async fn update_record(&self, id: &IdeaId, fields: &IdeaFields) -> RemoteResult<Idea> {
        self.execute_json(self.http.patch(self.idea_url(id)).json(fields)).await
    }

    async fn delete_record(&self, id: &IdeaId) -> RemoteResult<()> {
        self.execute(self.http.delete(self.idea_url(id))).await?;
        Ok(())
    }

    async fn subscribe(&self, owner: &UserId) -> RemoteResult<Subscription> {
        // The stream stays open for the life of the subscription, so only
        // the connect phase is bounded by the request timeout.
        let response = self
            .http
            .get(self.url("realtime"))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(self.error_from(response, false).await);
        }

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let (client_id, pending) =
            tokio::time::timeout(self.timeout, await_client_id(&mut stream, &mut decoder))
                .await
                .map_err(|_| RemoteError::transport("timed out waiting for realtime connect"))??;

        let topic = self.realtime_topic();
        let request = self.http.post(self.url("realtime")).json(&RealtimeSubscriptions {
            client_id: &client_id,
            subscriptions: vec![topic.clone()],
        });
        self.execute(request).await?;
        info!(owner = %owner, %client_id, %topic, "Realtime subscription established");

        let (subscription, sink) = Subscription::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(read_realtime(stream, decoder, pending, topic, sink));
        Ok(subscription)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }
}

// ============================================================================
// Realtime stream
// ============================================================================

/// Read until the connect event; returns the client id and any events that
/// arrived in the same chunk after it.
async fn await_client_id<S, B>(
    stream: &mut S,
    decoder: &mut SseDecoder,
) -> RemoteResult<(String, Vec<SseEvent>)>
where
    S: futures::Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(transport)?;
        let mut events = decoder.push(chunk.as_ref()).into_iter();
        for event in events.by_ref() {
            if event.event == CONNECT_EVENT {
                let payload: ConnectPayload = serde_json::from_str(&event.data).map_err(|err| {
                    RemoteError::transport(format!("invalid {CONNECT_EVENT} payload: {err}"))
                })?;
                return Ok((payload.client_id, events.collect()));
            }
        }
    }
    Err(RemoteError::transport("realtime stream closed before connect"))
}

async fn read_realtime<S, B>(
    mut stream: S,
    mut decoder: SseDecoder,
    pending: Vec<SseEvent>,
    topic: String,
    sink: SubscriptionSink,
) where
    S: futures::Stream<Item = reqwest::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    if !forward_events(pending, &topic, &sink).await {
        return;
    }
    loop {
        let next = tokio::select! {
            _ = sink.closed() => {
                debug!(%topic, "Realtime subscription closed");
                return;
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                if !forward_events(decoder.push(chunk.as_ref()), &topic, &sink).await {
                    return;
                }
            }
            Some(Err(err)) => {
                warn!(%err, "Realtime stream failed");
                return;
            }
            None => {
                info!(%topic, "Realtime stream closed by server");
                return;
            }
        }
    }
}

/// Returns false once the subscriber has gone away.
async fn forward_events(events: Vec<SseEvent>, topic: &str, sink: &SubscriptionSink) -> bool {
    for event in events {
        if let Some(change) = decode_change(topic, &event) {
            if !sink.send(change).await {
                return false;
            }
        }
    }
    true
}

fn decode_change(topic: &str, event: &SseEvent) -> Option<ChangeEvent> {
    if event.event != topic {
        trace!(event = %event.event, "Ignoring realtime event");
        return None;
    }
    match serde_json::from_str(&event.data) {
        Ok(change) => Some(change),
        Err(err) => {
            warn!(%err, "Undecodable realtime message");
            None
        }
    }
}
