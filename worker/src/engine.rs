use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;
use ucremote_core::{
    OutputState, ProgrammeInfo, SUPPORTED_VERSION, SourceCatalog, SourceId, SourceRecord,
    wire::{self, EventsDocument, OutputDocument, SearchDocument, ServerDocument, SourcesDocument},
};

use crate::{
    error::{ClientError, ConnectError, IncompatibleServerError},
    http::{HttpClient, Request},
    subscription::{Subscribers, Subscription, SyncEvent},
};

const SERVER_RESOURCE: &str = "uc";
const SOURCE_LIST_RESOURCE: &str = "uc/source-lists/uc_default";
const OUTPUT_RESOURCE: &str = "uc/outputs/main";
const EVENTS_RESOURCE: &str = "uc/events";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Bootstrapping,
    Connected,
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Pause before restarting the event stream after a failed poll.
    pub retry_delay: Duration,
}

/// What the server told us about itself during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReport {
    pub server_name: Option<String>,
    pub version: String,
    /// Required resources the server did not advertise.
    pub missing: Vec<&'static str>,
}

/// Everything learned from one server, published only once complete.
struct Session {
    base: Arc<str>,
    catalog: SourceCatalog,
    output_ref: String,
    output: OutputState,
    programme: ProgrammeInfo,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    /// Bumped whenever the session is dropped, so stale tasks can tell.
    generation: u64,
    session: Option<Session>,
    cancel: Option<CancellationToken>,
}

impl Shared {
    fn reset(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        self.generation += 1;
        self.session = None;
    }

    fn session(&mut self, generation: u64) -> Option<&mut Session> {
        if self.generation != generation {
            return None;
        }
        self.session.as_mut()
    }
}

/// Position in the server's event stream, paired with the output it watches.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SyncCursor {
    notification_id: String,
    output_ref: String,
}

impl SyncCursor {
    fn events_request(&self, base: &Arc<str>) -> Request {
        let request = Request::get(base, EVENTS_RESOURCE);
        if self.notification_id.is_empty() {
            request
        } else {
            request.query("since", &self.notification_id)
        }
    }
}

struct Core<H> {
    http: Arc<H>,
    options: SyncOptions,
    shared: Arc<Mutex<Shared>>,
    subscribers: Arc<Subscribers>,
}

impl<H> Clone for Core<H> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            options: self.options.clone(),
            shared: self.shared.clone(),
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<H: HttpClient> Core<H> {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, shared: &mut Shared, state: ConnectionState) {
        if shared.state == state {
            return;
        }
        tracing::info!("connection state {:?} -> {state:?}", shared.state);
        shared.state = state;
        self.subscribers.publish(SyncEvent::StateChanged(state));
    }

    async fn fetch<T: DeserializeOwned>(&self, request: Request) -> Result<T, ClientError> {
        let resource = request.path.clone();
        let body = self.http.send(request).await?;
        wire::from_str(&body).map_err(|source| ClientError::Protocol { resource, source })
    }

    async fn check_server(&self, base: &Arc<str>) -> Result<ConnectReport, ConnectError> {
        let document: ServerDocument = self.fetch(Request::get(base, SERVER_RESOURCE)).await?;
        let server = document.ucserver;

        if server.version != SUPPORTED_VERSION {
            return Err(IncompatibleServerError::UnsupportedVersion {
                found: server.version,
            }
            .into());
        }
        if server.security_scheme {
            return Err(IncompatibleServerError::SecuritySchemeRequired.into());
        }

        let missing = server.missing_resources();
        if !missing.is_empty() {
            tracing::warn!("server does not advertise {}", missing.join(", "));
        }

        Ok(ConnectReport {
            server_name: server.name,
            version: server.version,
            missing,
        })
    }

    async fn fetch_catalog(&self, base: &Arc<str>) -> Result<SourceCatalog, ClientError> {
        let document: SourcesDocument =
            self.fetch(Request::get(base, SOURCE_LIST_RESOURCE)).await?;
        Ok(document.into_catalog())
    }

    async fn fetch_output(&self, base: &Arc<str>) -> Result<(String, OutputState), ClientError> {
        let document: OutputDocument = self.fetch(Request::get(base, OUTPUT_RESOURCE)).await?;
        let output_ref = match document.resource_ref() {
            "" => OUTPUT_RESOURCE.to_string(),
            rref => rref.to_string(),
        };
        Ok((output_ref, document.to_output_state()))
    }

    async fn fetch_programme(
        &self,
        base: &Arc<str>,
        output_ref: &str,
    ) -> Result<ProgrammeInfo, ClientError> {
        let output_id = output_ref.rsplit('/').next().unwrap_or(output_ref);
        let request =
            Request::get(base, format!("uc/search/outputs/{output_id}")).query("results", 1);
        let resource = request.path.clone();
        let body = self.http.send(request).await?;
        let document = SearchDocument::parse(&body)
            .map_err(|source| ClientError::Protocol { resource, source })?;
        Ok(document.into_programme())
    }

    async fn bootstrap(&self, base: &Arc<str>) -> Result<(ConnectReport, Session), ConnectError> {
        let report = self.check_server(base).await?;
        let catalog = self.fetch_catalog(base).await?;
        tracing::info!("loaded {} sources", catalog.len());
        let (output_ref, output) = self.fetch_output(base).await?;
        let programme = self.fetch_programme(base, &output_ref).await?;

        let session = Session {
            base: base.clone(),
            catalog,
            output_ref,
            output,
            programme,
        };
        Ok((report, session))
    }

    /// Re-read the output and, if that worked, its programme.
    async fn refresh_output(&self, generation: u64, base: &Arc<str>, cursor: &mut SyncCursor) {
        let (output_ref, output) = match self.fetch_output(base).await {
            Ok(fetched) => fetched,
            Err(error) => {
                tracing::warn!("abandoning output refresh: {error}");
                return;
            }
        };

        {
            let mut shared = self.lock();
            let Some(session) = shared.session(generation) else {
                return;
            };
            session.output_ref = output_ref.clone();
            if session.output != output {
                session.output = output.clone();
                self.subscribers.publish(SyncEvent::OutputChanged(output));
            }
        }
        cursor.output_ref = output_ref;

        let programme = match self.fetch_programme(base, &cursor.output_ref).await {
            Ok(programme) => programme,
            Err(error) => {
                tracing::warn!("abandoning programme refresh: {error}");
                return;
            }
        };

        let mut shared = self.lock();
        if let Some(session) = shared.session(generation)
            && session.programme != programme
        {
            session.programme = programme.clone();
            self.subscribers.publish(SyncEvent::ProgrammeChanged(programme));
        }
    }

    async fn poll(
        &self,
        generation: u64,
        base: &Arc<str>,
        cursor: &mut SyncCursor,
    ) -> Result<(), ClientError> {
        let document: EventsDocument = self.fetch(cursor.events_request(base)).await?;
        let events = document.events;
        tracing::debug!(
            "event cursor {:?} -> {:?}",
            cursor.notification_id,
            events.notification_id
        );
        cursor.notification_id = events.notification_id.clone();

        if events.names(&cursor.output_ref) {
            self.refresh_output(generation, base, cursor).await;
        }
        Ok(())
    }

    async fn run(
        self,
        generation: u64,
        base: Arc<str>,
        output_ref: String,
        token: CancellationToken,
    ) {
        tracing::info!("event loop started for {base}");
        let mut cursor = SyncCursor {
            notification_id: String::new(),
            output_ref,
        };

        while !token.is_cancelled() {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = self.poll(generation, &base, &mut cursor) => result,
            };

            if let Err(error) = result {
                tracing::error!("event poll failed, restarting from scratch: {error}");
                cursor.notification_id.clear();
                if !self.options.retry_delay.is_zero() {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.options.retry_delay) => {}
                    }
                }
            }
        }

        tracing::info!("event loop for {base} stopped");
    }
}

struct Inner<H> {
    core: Core<H>,
}

impl<H> Drop for Inner<H> {
    fn drop(&mut self) {
        let mut shared = self.core.shared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = shared.cancel.take() {
            token.cancel();
        }
    }
}

/// Keeps a local copy of one server's state in sync through its event
/// stream. Clones share the same session.
pub struct SyncEngine<H> {
    inner: Arc<Inner<H>>,
}

impl<H> Clone for SyncEngine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<H: HttpClient> SyncEngine<H> {
    pub fn new(http: Arc<H>, options: SyncOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                core: Core {
                    http,
                    options,
                    shared: Arc::default(),
                    subscribers: Arc::default(),
                },
            }),
        }
    }

    fn core(&self) -> &Core<H> {
        &self.inner.core
    }

    pub(crate) fn http(&self) -> Arc<H> {
        self.core().http.clone()
    }

    /// Bootstrap against `base_url` and start following its events. Any
    /// previous session is dropped first.
    pub async fn connect(&self, base_url: &str) -> Result<ConnectReport, ConnectError> {
        let core = self.core();
        let base: Arc<str> = Arc::from(base_url.trim_end_matches('/'));
        let token = CancellationToken::new();

        let generation = {
            let mut shared = core.lock();
            shared.reset();
            core.transition(&mut shared, ConnectionState::Disconnected);
            core.transition(&mut shared, ConnectionState::Bootstrapping);
            shared.cancel = Some(token.clone());
            shared.generation
        };

        tracing::info!("connecting to {base}");
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ConnectError::Cancelled),
            result = core.bootstrap(&base) => result,
        };

        let mut shared = core.lock();
        if shared.generation != generation {
            return Err(ConnectError::Cancelled);
        }

        match result {
            Ok((report, session)) => {
                let output = session.output.clone();
                let programme = session.programme.clone();
                let output_ref = session.output_ref.clone();
                shared.session = Some(session);
                core.transition(&mut shared, ConnectionState::Connected);
                core.subscribers.publish(SyncEvent::CatalogReplaced);
                core.subscribers.publish(SyncEvent::OutputChanged(output));
                core.subscribers.publish(SyncEvent::ProgrammeChanged(programme));

                tokio::spawn(core.clone().run(generation, base, output_ref, token));
                Ok(report)
            }
            Err(error) => {
                tracing::warn!("bootstrap of {base} failed: {error}");
                shared.reset();
                core.transition(&mut shared, ConnectionState::Disconnected);
                Err(error)
            }
        }
    }

    /// Stop following events and forget the session.
    pub fn disconnect(&self) {
        let core = self.core();
        let mut shared = core.lock();
        shared.reset();
        core.transition(&mut shared, ConnectionState::Disconnected);
    }

    pub fn subscribe(&self) -> Subscription {
        self.core().subscribers.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.core().lock().state
    }

    pub fn current_output(&self) -> Option<OutputState> {
        let shared = self.core().lock();
        shared.session.as_ref().map(|session| session.output.clone())
    }

    pub fn current_programme(&self) -> Option<ProgrammeInfo> {
        let shared = self.core().lock();
        shared.session.as_ref().map(|session| session.programme.clone())
    }

    pub fn source_catalog(&self) -> Vec<SourceRecord> {
        let shared = self.core().lock();
        shared
            .session
            .as_ref()
            .map(|session| session.catalog.to_vec())
            .unwrap_or_default()
    }

    pub fn source(&self, id: &SourceId) -> Option<SourceRecord> {
        let shared = self.core().lock();
        shared.session.as_ref()?.catalog.get(id).cloned()
    }

    pub fn output_ref(&self) -> Option<String> {
        let shared = self.core().lock();
        shared.session.as_ref().map(|session| session.output_ref.clone())
    }

    pub fn base_url(&self) -> Option<Arc<str>> {
        let shared = self.core().lock();
        shared.session.as_ref().map(|session| session.base.clone())
    }

    /// Changes with every connect and disconnect; `None` while disconnected.
    pub fn session_id(&self) -> Option<u64> {
        let shared = self.core().lock();
        shared.session.as_ref().map(|_| shared.generation)
    }
}
