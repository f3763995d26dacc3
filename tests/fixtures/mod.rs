//! Shared fixtures: deterministic identities, stub collaborators, event
//! builders.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use weft::{
    Config, ContainerRef, EventAction, EventId, EventTime, IdentityKey, MemoryKv, NetworkEvent,
    PatchFields, Phase, PollClient, PollError, PolledRecord, PublishError, PublishRequest,
    Publisher, ReconciliationEngine, RecordId, RepoName, ResourceKind, ScopeKey, WirePayload,
};

/// Deterministic identity from a fill byte.
pub fn key(fill: u8) -> IdentityKey {
    IdentityKey::from_bytes([fill; 32])
}

pub fn container(owner: IdentityKey, name: &str) -> ContainerRef {
    ContainerRef::new(owner, RepoName::parse(name).unwrap())
}

pub fn issue_scope(owner: IdentityKey, name: &str) -> ScopeKey {
    ScopeKey::new(container(owner, name), ResourceKind::Issue)
}

/// 64-hex event id from a fill character.
pub fn event_hex(fill: char) -> String {
    fill.to_string().repeat(64)
}

/// Poll stub returning queued responses, then empty pages.
pub struct QueuedPoll {
    responses: Mutex<VecDeque<Result<Vec<PolledRecord>, PollError>>>,
}

impl QueuedPoll {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
        })
    }

    pub fn push(&self, response: Result<Vec<PolledRecord>, PollError>) {
        self.responses.lock().unwrap().push_back(response);
    }
}

impl PollClient for QueuedPoll {
    fn fetch(
        &self,
        _container: &ContainerRef,
        _kind: ResourceKind,
        _timeout: Duration,
    ) -> Result<Vec<PolledRecord>, PollError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Shared handle so the engine and test hold the same `QueuedPoll`.
struct SharedPoll(Arc<QueuedPoll>);

impl PollClient for SharedPoll {
    fn fetch(
        &self,
        container: &ContainerRef,
        kind: ResourceKind,
        timeout: Duration,
    ) -> Result<Vec<PolledRecord>, PollError> {
        self.0.fetch(container, kind, timeout)
    }
}

/// Publisher stub recording every request; can be told to fail.
pub struct RecordingPublisher {
    pub sent: Mutex<Vec<PublishRequest>>,
    pub fail: AtomicBool,
    next_id: AtomicU64,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Publisher for RecordingPublisher {
    fn publish(&self, request: &PublishRequest) -> Result<EventId, PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PublishError::Relay {
                reason: "stub relay down".into(),
            });
        }
        self.sent.lock().unwrap().push(request.clone());
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(EventId::parse(&format!("{n:064x}")).unwrap())
    }
}

/// Shared handle so the engine and test hold the same `RecordingPublisher`.
struct SharedPublisher(Arc<RecordingPublisher>);

impl Publisher for SharedPublisher {
    fn publish(&self, request: &PublishRequest) -> Result<EventId, PublishError> {
        self.0.publish(request)
    }
}

pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub poll: Arc<QueuedPoll>,
    pub publisher: Arc<RecordingPublisher>,
}

/// Engine over in-memory storage and stub collaborators.
pub fn harness() -> Harness {
    harness_with(Config::default())
}

pub fn harness_with(config: Config) -> Harness {
    let poll = QueuedPoll::new();
    let publisher = RecordingPublisher::new();
    let engine = Arc::new(ReconciliationEngine::new(
        Box::new(MemoryKv::new()),
        Box::new(SharedPoll(Arc::clone(&poll))),
        Box::new(SharedPublisher(Arc::clone(&publisher))),
        config,
    ));
    Harness {
        engine,
        poll,
        publisher,
    }
}

/// Builder for network events addressing an issue scope.
pub struct EventBuilder {
    event: NetworkEvent,
}

impl EventBuilder {
    pub fn new(id_fill: char, owner: IdentityKey, repo: &str, author: IdentityKey) -> Self {
        Self {
            event: NetworkEvent {
                id: EventId::parse(&event_hex(id_fill)).unwrap(),
                author,
                at: EventTime(0),
                owner_entity: owner.to_hex(),
                repo: repo.to_string(),
                kind: ResourceKind::Issue,
                action: EventAction::Announce,
                target: None,
                client_ref: None,
                payload: WirePayload::Structured(PatchFields::default()),
            },
        }
    }

    pub fn kind(mut self, kind: ResourceKind) -> Self {
        self.event.kind = kind;
        self
    }

    pub fn at(mut self, secs: u64) -> Self {
        self.event.at = EventTime(secs);
        self
    }

    pub fn owner_entity(mut self, entity: &str) -> Self {
        self.event.owner_entity = entity.to_string();
        self
    }

    pub fn announce(mut self, title: &str) -> Self {
        self.event.action = EventAction::Announce;
        self.event.payload = WirePayload::Structured(PatchFields {
            title: Some(title.to_string()),
            ..PatchFields::default()
        });
        self
    }

    pub fn edit_fields(mut self, fields: PatchFields) -> Self {
        self.event.action = EventAction::Edit;
        self.event.payload = WirePayload::Structured(fields);
        self
    }

    pub fn legacy(mut self, payload: serde_json::Value) -> Self {
        self.event.action = EventAction::Edit;
        self.event.payload = WirePayload::Legacy(payload);
        self
    }

    pub fn status(mut self, phase: Phase) -> Self {
        self.event.action = EventAction::Status { phase };
        self
    }

    pub fn remove(mut self) -> Self {
        self.event.action = EventAction::Remove { reason: None };
        self
    }

    pub fn target(mut self, id: &str) -> Self {
        self.event.target = Some(RecordId::parse(id).unwrap());
        self
    }

    pub fn client_ref(mut self, id: &str) -> Self {
        self.event.client_ref = Some(id.to_string());
        self
    }

    pub fn build(self) -> NetworkEvent {
        self.event
    }
}

pub fn polled_issue(number: u64, title: &str, state: &str, created_secs: u64) -> PolledRecord {
    PolledRecord {
        number,
        title: title.to_string(),
        body: String::new(),
        state: state.to_string(),
        author: None,
        created_secs,
    }
}
