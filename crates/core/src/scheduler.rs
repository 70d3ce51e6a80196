//! Priority-aware transcoding session scheduler.
//!
//! The scheduler owns every submitted session, groups them into per-submitter
//! queues ordered by foreground priority, and drives a single
//! [`TranscoderControl`] so that at any moment the top session is the one
//! executing. Submissions, cancellations, submitter-priority changes,
//! resource loss/recovery and pipeline completion events all funnel through
//! one lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::error::TranscodeError;
use crate::session::{
    ClientCallback, ClientCallbackRef, ClientId, Priority, SessionId, SessionKey, SessionState,
    SubmitterId, TranscodingRequest,
};

/// Capability the scheduler uses to drive the transcoder.
///
/// Invoked with the scheduler lock held; implementations must be
/// non-blocking or briefly-blocking and must not call back into the
/// scheduler synchronously.
pub trait TranscoderControl: Send + Sync {
    fn start(
        &self,
        client: ClientId,
        session: SessionId,
        request: &TranscodingRequest,
        callback: Option<Arc<dyn ClientCallback>>,
    );

    fn pause(&self, client: ClientId, session: SessionId);

    fn resume(
        &self,
        client: ClientId,
        session: SessionId,
        request: &TranscodingRequest,
        callback: Option<Arc<dyn ClientCallback>>,
    );

    fn stop(&self, client: ClientId, session: SessionId);
}

/// Platform policy reporting which submitters are foreground.
pub trait SubmitterPolicy: Send + Sync {
    fn register_monitor(&self, submitter: SubmitterId);
    fn unregister_monitor(&self, submitter: SubmitterId);
    fn is_on_top(&self, submitter: SubmitterId) -> bool;
    fn top_set(&self) -> HashSet<SubmitterId>;
}

struct Session {
    submitter: SubmitterId,
    state: SessionState,
    last_progress: u32,
    request: TranscodingRequest,
    callback: ClientCallbackRef,
}

struct State {
    sessions: HashMap<SessionKey, Session>,
    /// Per-submitter queues in submission order. The offline queue always
    /// exists; real-time queues come and go with their sessions.
    queues: HashMap<SubmitterId, VecDeque<SessionKey>>,
    /// Submitters front-to-back by descending foreground priority, with
    /// [`SubmitterId::OFFLINE`] pinned at the back.
    order: VecDeque<SubmitterId>,
    current: Option<SessionKey>,
    resource_lost: bool,
}

impl State {
    fn top_session(&self) -> Option<SessionKey> {
        if self.sessions.is_empty() {
            return None;
        }
        let top = self.order.front()?;
        self.queues.get(top).and_then(|q| q.front()).copied()
    }
}

/// The session scheduler.
pub struct SessionScheduler {
    transcoder: Arc<dyn TranscoderControl>,
    policy: Arc<dyn SubmitterPolicy>,
    state: Mutex<State>,
}

impl SessionScheduler {
    pub fn new(transcoder: Arc<dyn TranscoderControl>, policy: Arc<dyn SubmitterPolicy>) -> Self {
        // Only the offline queue exists initially; real-time queues are
        // added as requests come in.
        let mut queues = HashMap::new();
        queues.insert(SubmitterId::OFFLINE, VecDeque::new());
        let mut order = VecDeque::new();
        order.push_back(SubmitterId::OFFLINE);
        Self {
            transcoder,
            policy,
            state: Mutex::new(State {
                sessions: HashMap::new(),
                queues,
                order,
                current: None,
                resource_lost: false,
            }),
        }
    }

    /// Register a new session. Returns `false` if the key already exists.
    pub fn submit(
        &self,
        client: ClientId,
        session: SessionId,
        submitter: SubmitterId,
        request: TranscodingRequest,
        callback: ClientCallbackRef,
    ) -> bool {
        let key = SessionKey::new(client, session);
        debug!(
            "submit: session {}, submitter {}, priority {:?}",
            key, submitter, request.priority
        );

        let mut st = self.state.lock();

        if st.sessions.contains_key(&key) {
            error!("session {} already exists", key);
            return false;
        }

        // Sessions with unspecified priority all go to the offline queue,
        // whatever their submitter.
        let submitter = if request.priority == Priority::Unspecified {
            SubmitterId::OFFLINE
        } else {
            submitter
        };

        // The offline queue was created in the constructor. For a real-time
        // session, create its submitter's queue on first use and slot the
        // submitter into the priority order.
        if !submitter.is_offline() {
            if !st.queues.contains_key(&submitter) {
                self.policy.register_monitor(submitter);
                if self.policy.is_on_top(submitter) {
                    st.order.push_front(submitter);
                } else {
                    // A real-time request from a non-top app still outranks
                    // offline work: insert just ahead of the offline entry.
                    let back = st.order.len() - 1;
                    st.order.insert(back, submitter);
                }
                st.queues.insert(submitter, VecDeque::new());
            } else if st.order.front() != Some(&submitter) && self.policy.is_on_top(submitter) {
                st.order.retain(|s| *s != submitter);
                st.order.push_front(submitter);
            }
        }

        if let Some(queue) = st.queues.get_mut(&submitter) {
            queue.push_back(key);
        }
        st.sessions.insert(
            key,
            Session {
                submitter,
                state: SessionState::NotStarted,
                last_progress: 0,
                request,
                callback,
            },
        );

        self.update_current_session(&mut st);
        Self::validate_state(&st);
        true
    }

    /// Cancel one session, or every real-time session of `client` when
    /// `session` is negative. Returns `false` only when a single named
    /// session does not exist.
    pub fn cancel(&self, client: ClientId, session: SessionId) -> bool {
        let key = SessionKey::new(client, session);
        debug!("cancel: session {}", key);

        let mut st = self.state.lock();

        let mut to_remove = Vec::new();
        if session.0 < 0 {
            for (k, s) in &st.sessions {
                if k.client == client && !s.submitter.is_offline() {
                    to_remove.push(*k);
                }
            }
            to_remove.sort();
        } else {
            if !st.sessions.contains_key(&key) {
                error!("session {} doesn't exist", key);
                return false;
            }
            to_remove.push(key);
        }

        for k in to_remove {
            // Stop a session that has ever been started, even a paused one,
            // so the transcoder discards any state it retained for it.
            if st.sessions.get(&k).map(|s| s.state) != Some(SessionState::NotStarted) {
                self.transcoder.stop(k.client, k.session);
            }
            self.remove_session(&mut st, k);
        }

        self.update_current_session(&mut st);
        Self::validate_state(&st);
        true
    }

    /// Copy out the request of a registered session.
    pub fn session_request(
        &self,
        client: ClientId,
        session: SessionId,
    ) -> Option<TranscodingRequest> {
        let st = self.state.lock();
        st.sessions
            .get(&SessionKey::new(client, session))
            .map(|s| s.request.clone())
    }

    /// The transcoder started the session.
    pub fn on_started(&self, client: ClientId, session: SessionId) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "started", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_started(session);
            }
        });
    }

    /// The transcoder paused the session on its own.
    pub fn on_paused(&self, client: ClientId, session: SessionId) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "paused", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_paused(session);
            }
        });
    }

    /// The transcoder resumed the session.
    pub fn on_resumed(&self, client: ClientId, session: SessionId) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "resumed", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_resumed(session);
            }
        });
    }

    /// The transcoder finished the session; notify and advance.
    pub fn on_finished(&self, client: ClientId, session: SessionId) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "finish", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_finished(session);
            }
            self.remove_session(st, key);
            self.update_current_session(st);
            Self::validate_state(st);
        });
    }

    /// The transcoder failed the session; notify and advance. Failures are
    /// terminal, the session is never retried.
    pub fn on_failed(&self, client: ClientId, session: SessionId, err: TranscodeError) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "error", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_failed(session, err);
            }
            self.remove_session(st, key);
            self.update_current_session(st);
            Self::validate_state(st);
        });
    }

    /// Progress report from the transcoder, forwarded and remembered.
    pub fn on_progress(&self, client: ClientId, session: SessionId, progress: u32) {
        let key = SessionKey::new(client, session);
        self.notify_client(key, "progress", |st| {
            if let Some(cb) = st.sessions[&key].callback.upgrade() {
                cb.on_progress_update(session, progress);
            }
            if let Some(sess) = st.sessions.get_mut(&key) {
                sess.last_progress = progress;
            }
        });
    }

    /// The set of foreground submitters changed.
    pub fn on_top_submitters_changed(&self, submitters: &HashSet<SubmitterId>) {
        if submitters.is_empty() {
            warn!("ignoring empty top submitter set");
            return;
        }

        let list = submitters
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        debug!("top submitters changed: {}", list);

        let mut st = self.state.lock();
        Self::move_submitters_to_front(&mut st, submitters, true);
        self.update_current_session(&mut st);
        Self::validate_state(&st);
    }

    /// The platform took the transcoding hardware away. Idempotent.
    pub fn on_resource_lost(&self) {
        let mut st = self.state.lock();
        if st.resource_lost {
            return;
        }
        info!("transcoding resource lost");

        // The resource owner already paused the hardware; only the state
        // and the client notification happen here.
        if let Some(cur) = st.current {
            if let Some(sess) = st.sessions.get_mut(&cur) {
                if sess.state == SessionState::Running {
                    sess.state = SessionState::Paused;
                    if let Some(cb) = sess.callback.upgrade() {
                        cb.on_paused(cur.session);
                    }
                }
            }
        }
        st.resource_lost = true;

        Self::validate_state(&st);
    }

    /// The transcoding hardware is usable again. Idempotent.
    pub fn on_resource_available(&self) {
        let mut st = self.state.lock();
        if !st.resource_lost {
            return;
        }
        info!("transcoding resource available");

        st.resource_lost = false;
        self.update_current_session(&mut st);
        Self::validate_state(&st);
    }

    /// Human-readable report of every queue and session.
    pub fn dump(&self) -> String {
        let st = self.state.lock();
        let mut out = String::new();
        let _ = writeln!(out, "========== Session queues ==========");
        let _ = writeln!(out, "  Total num of sessions: {}", st.sessions.len());
        for submitter in &st.order {
            let Some(queue) = st.queues.get(submitter) else {
                continue;
            };
            if queue.is_empty() {
                continue;
            }
            let _ = writeln!(out, "    Submitter: {}", submitter);
            let _ = writeln!(out, "      Num of sessions: {}", queue.len());
            for key in queue {
                let Some(sess) = st.sessions.get(key) else {
                    let _ = writeln!(out, "      Failed to look up session {}", key);
                    continue;
                };
                let _ = writeln!(
                    out,
                    "      Session: {}, {}, {}%",
                    key, sess.state, sess.last_progress
                );
                let _ = writeln!(out, "        Src: {}", sess.request.source_path);
                let _ = writeln!(out, "        Dst: {}", sess.request.destination_path);
            }
        }
        out
    }

    /// Run `f` for a session that exists and has ever been started. Events
    /// for unknown or not-yet-started sessions raced ahead of a state
    /// change and are dropped. A paused session still gets its events: the
    /// transcoder may post a completion while the scheduler is pausing it.
    fn notify_client(&self, key: SessionKey, reason: &str, f: impl FnOnce(&mut State)) {
        let mut st = self.state.lock();
        match st.sessions.get(&key) {
            None => {
                warn!("ignoring {} for session {} that doesn't exist", reason, key);
            }
            Some(sess) if sess.state == SessionState::NotStarted => {
                warn!(
                    "ignoring {} for session {} that was never started",
                    reason, key
                );
            }
            Some(_) => {
                debug!("session {}: {}", key, reason);
                f(&mut st);
            }
        }
    }

    /// Make sure the top session is the one executing.
    ///
    /// Pauses a running non-top session, then starts or resumes the top
    /// session unless the resource is lost. The current pointer tracks the
    /// top session even under resource loss so a later recovery targets the
    /// right session.
    fn update_current_session(&self, st: &mut State) {
        let top = st.top_session();
        let cur = st.current;
        trace!("updateCurrentSession: top {:?}, current {:?}", top, cur);

        if let Some(top_key) = top {
            let top_running =
                st.sessions.get(&top_key).map(|s| s.state) == Some(SessionState::Running);
            if cur != Some(top_key) || !top_running {
                if let Some(cur_key) = cur {
                    if let Some(cur_sess) = st.sessions.get_mut(&cur_key) {
                        if cur_sess.state == SessionState::Running {
                            self.transcoder.pause(cur_key.client, cur_key.session);
                            cur_sess.state = SessionState::Paused;
                        }
                    }
                }
                if !st.resource_lost {
                    if let Some(sess) = st.sessions.get_mut(&top_key) {
                        match sess.state {
                            SessionState::NotStarted => self.transcoder.start(
                                top_key.client,
                                top_key.session,
                                &sess.request,
                                sess.callback.upgrade(),
                            ),
                            SessionState::Paused => self.transcoder.resume(
                                top_key.client,
                                top_key.session,
                                &sess.request,
                                sess.callback.upgrade(),
                            ),
                            SessionState::Running => {}
                        }
                        sess.state = SessionState::Running;
                    }
                }
            }
        }
        st.current = top;
    }

    fn remove_session(&self, st: &mut State, key: SessionKey) {
        trace!("removeSession: {}", key);

        let Some(submitter) = st.sessions.get(&key).map(|s| s.submitter) else {
            error!("session {} doesn't exist", key);
            return;
        };

        let Some(queue) = st.queues.get_mut(&submitter) else {
            error!("no queue for submitter {}", submitter);
            return;
        };
        let Some(pos) = queue.iter().position(|k| *k == key) else {
            error!(
                "couldn't find session {} in queue for submitter {}",
                key, submitter
            );
            return;
        };
        queue.remove(pos);

        // The last session of a real-time submitter takes its queue with
        // it. Re-apply the current top set afterwards; the preserve-front
        // rule doesn't apply since this submitter's queue just vanished.
        if !submitter.is_offline() && queue.is_empty() {
            st.queues.remove(&submitter);
            st.order.retain(|s| *s != submitter);
            self.policy.unregister_monitor(submitter);

            let tops = self.policy.top_set();
            Self::move_submitters_to_front(st, &tops, false);
        }

        if st.current == Some(key) {
            st.current = None;
        }

        st.sessions.remove(&key);
    }

    /// Move the given submitters to the front of the priority order.
    ///
    /// With `preserve_front` set and the current front submitter still in
    /// the set, it stays at the very front so the in-flight session is not
    /// interrupted just because the top set widened.
    fn move_submitters_to_front(
        st: &mut State,
        submitters: &HashSet<SubmitterId>,
        preserve_front: bool,
    ) {
        if submitters.is_empty() {
            return;
        }
        let Some(cur_front) = st.order.front().copied() else {
            return;
        };

        let mut moved = Vec::new();
        st.order.retain(|s| {
            if !s.is_offline() && submitters.contains(s) {
                moved.push(*s);
                false
            } else {
                true
            }
        });

        let mut push_front_last = false;
        for submitter in moved {
            if preserve_front && submitter == cur_front {
                push_front_last = true;
            } else {
                st.order.push_front(submitter);
            }
        }
        if push_front_last {
            st.order.push_front(cur_front);
        }
    }

    fn validate_state(st: &State) {
        #[cfg(debug_assertions)]
        {
            assert_eq!(
                st.queues.keys().filter(|s| s.is_offline()).count(),
                1,
                "offline queue must exist exactly once"
            );
            assert_eq!(
                st.order.back(),
                Some(&SubmitterId::OFFLINE),
                "offline submitter must stay at the back of the order"
            );
            assert_eq!(
                st.order.iter().filter(|s| s.is_offline()).count(),
                1,
                "offline submitter must appear exactly once"
            );
            assert_eq!(
                st.order.len(),
                st.queues.len(),
                "submitter order and queue map must match"
            );

            let mut total = 0;
            for submitter in &st.order {
                let queue = st
                    .queues
                    .get(submitter)
                    .unwrap_or_else(|| panic!("no queue for submitter {}", submitter));
                for key in queue {
                    assert!(
                        st.sessions.get(key).map(|s| s.submitter) == Some(*submitter),
                        "session {} not registered under submitter {}",
                        key,
                        submitter
                    );
                }
                total += queue.len();
            }
            assert_eq!(
                st.sessions.len(),
                total,
                "session registry and queues disagree"
            );

            let running = st
                .sessions
                .values()
                .filter(|s| s.state == SessionState::Running)
                .count();
            assert!(running <= 1, "more than one running session");

            if let Some(cur) = st.current {
                assert_eq!(
                    Some(cur),
                    st.top_session(),
                    "current session is not the top session"
                );
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = st;
    }

    #[cfg(test)]
    fn with_state<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&self.state.lock())
    }
}
