//! Scripted collaborators shared by the unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::TranscodeError;
use crate::scheduler::{SubmitterPolicy, TranscoderControl};
use crate::session::{
    ClientCallback, ClientId, SessionId, SessionKey, SubmitterId, TranscodingRequest,
};

/// Install a test subscriber once so `RUST_LOG` works under `cargo test`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Start(SessionKey),
    Pause(SessionKey),
    Resume(SessionKey),
    Stop(SessionKey),
}

/// Records every `TranscoderControl` invocation in order.
#[derive(Default)]
pub struct MockTranscoderControl {
    calls: Mutex<Vec<ControlCall>>,
}

impl MockTranscoderControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Drain and return the calls recorded so far.
    pub fn take_calls(&self) -> Vec<ControlCall> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl TranscoderControl for MockTranscoderControl {
    fn start(
        &self,
        client: ClientId,
        session: SessionId,
        _request: &TranscodingRequest,
        _callback: Option<Arc<dyn ClientCallback>>,
    ) {
        self.calls
            .lock()
            .push(ControlCall::Start(SessionKey::new(client, session)));
    }

    fn pause(&self, client: ClientId, session: SessionId) {
        self.calls
            .lock()
            .push(ControlCall::Pause(SessionKey::new(client, session)));
    }

    fn resume(
        &self,
        client: ClientId,
        session: SessionId,
        _request: &TranscodingRequest,
        _callback: Option<Arc<dyn ClientCallback>>,
    ) {
        self.calls
            .lock()
            .push(ControlCall::Resume(SessionKey::new(client, session)));
    }

    fn stop(&self, client: ClientId, session: SessionId) {
        self.calls
            .lock()
            .push(ControlCall::Stop(SessionKey::new(client, session)));
    }
}

/// Submitter policy with a scripted top set.
#[derive(Default)]
pub struct MockSubmitterPolicy {
    top: Mutex<HashSet<SubmitterId>>,
    registered: Mutex<Vec<SubmitterId>>,
    unregistered: Mutex<Vec<SubmitterId>>,
}

impl MockSubmitterPolicy {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_top<I: IntoIterator<Item = u32>>(&self, submitters: I) {
        *self.top.lock() = submitters.into_iter().map(SubmitterId).collect();
    }

    pub fn registered(&self) -> Vec<SubmitterId> {
        self.registered.lock().clone()
    }

    pub fn unregistered(&self) -> Vec<SubmitterId> {
        self.unregistered.lock().clone()
    }
}

impl SubmitterPolicy for MockSubmitterPolicy {
    fn register_monitor(&self, submitter: SubmitterId) {
        self.registered.lock().push(submitter);
    }

    fn unregister_monitor(&self, submitter: SubmitterId) {
        self.unregistered.lock().push(submitter);
    }

    fn is_on_top(&self, submitter: SubmitterId) -> bool {
        self.top.lock().contains(&submitter)
    }

    fn top_set(&self) -> HashSet<SubmitterId> {
        self.top.lock().clone()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Started(SessionId),
    Paused(SessionId),
    Resumed(SessionId),
    Finished(SessionId),
    Failed(SessionId, TranscodeError),
    Progress(SessionId, u32),
}

/// Records client notifications in delivery order.
#[derive(Default)]
pub struct MockClientCallback {
    events: Mutex<Vec<ClientEvent>>,
}

impl MockClientCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn take_events(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl ClientCallback for MockClientCallback {
    fn on_started(&self, session: SessionId) {
        self.events.lock().push(ClientEvent::Started(session));
    }

    fn on_paused(&self, session: SessionId) {
        self.events.lock().push(ClientEvent::Paused(session));
    }

    fn on_resumed(&self, session: SessionId) {
        self.events.lock().push(ClientEvent::Resumed(session));
    }

    fn on_finished(&self, session: SessionId) {
        self.events.lock().push(ClientEvent::Finished(session));
    }

    fn on_failed(&self, session: SessionId, error: TranscodeError) {
        self.events.lock().push(ClientEvent::Failed(session, error));
    }

    fn on_progress_update(&self, session: SessionId, progress: u32) {
        self.events.lock().push(ClientEvent::Progress(session, progress));
    }
}
