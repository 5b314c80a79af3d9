//! Signaling orchestrator — the protocol handler
//!
//! Consumes inbound envelopes and user actions, drives the session registry
//! and peer sessions, and emits outbound envelopes. Everything runs on one
//! task: capability operations are started as futures and their completions
//! come back through the same loop, one at a time.

mod call;
mod room;

use crate::call::{CallMachine, CallState, CallStatus, CallTrigger};
use crate::capability::{
    CapabilityError, MediaDevices, MediaStream, OnIceCandidate, PeerConnection, PeerConnectionFactory,
};
use crate::message::{codec, ClientMessage, CodecError, IceCandidate, ParticipantInfo, Role, ServerMessage};
use crate::session::{
    BufferOutcome, CandidateBuffer, CandidateRoute, PeerSession, SessionId, SessionPhase, SessionRegistry,
};
use crate::transport::TransportEvent;
use crate::SignalError;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

/// How long an offered session may wait for its answer
pub const DEFAULT_ANSWER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// `None` waits forever
    pub answer_timeout: Option<Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            answer_timeout: Some(DEFAULT_ANSWER_TIMEOUT),
        }
    }
}

/// Which client this orchestrator is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    /// Multi-party room with publisher/viewer roles
    Room,
    /// Exactly one remote peer; `identity` keys the single session
    Call { identity: String },
}

/// The only externally triggered entry points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    Join { name: String, room: String, role: Role },
    Leave,
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A line for the user-facing status surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.level {
            NoticeLevel::Info => write!(f, "{}", self.text),
            NoticeLevel::Error => write!(f, "error: {}", self.text),
        }
    }
}

#[derive(Debug, Clone)]
struct LocalMember {
    name: String,
    room: String,
    role: Role,
}

#[derive(Debug, Default)]
struct RoomMembership {
    local: Option<LocalMember>,
    /// Remote members and their roles
    roster: HashMap<String, Role>,
}

#[derive(Debug)]
struct CallSide {
    identity: String,
    machine: CallMachine,
}

#[derive(Debug)]
enum Mode {
    Room(RoomMembership),
    Call(CallSide),
}

enum MediaPurpose {
    /// Publish, then subscribe to the members listed at join
    Publish { existing: Vec<ParticipantInfo> },
    Call,
}

struct MediaRequest {
    id: u64,
    purpose: MediaPurpose,
}

/// A finished capability operation
enum Completion {
    LocalMedia {
        request: u64,
        result: Result<MediaStream, CapabilityError>,
    },
    Created {
        identity: String,
        session: SessionId,
        result: Result<Arc<dyn PeerConnection>, CapabilityError>,
    },
    Offer {
        identity: String,
        session: SessionId,
        result: Result<String, CapabilityError>,
    },
    Answer {
        identity: String,
        session: SessionId,
        result: Result<(), CapabilityError>,
    },
    Candidate {
        identity: String,
        session: SessionId,
        result: Result<(), CapabilityError>,
    },
}

struct AnswerDeadline {
    identity: String,
    session: SessionId,
}

/// Candidate gathered by a local capability
struct LocalCandidate {
    identity: String,
    session: SessionId,
    candidate: IceCandidate,
}

pub struct Orchestrator {
    mode: Mode,
    registry: SessionRegistry,
    buffer: CandidateBuffer,
    factory: Arc<dyn PeerConnectionFactory>,
    media: Arc<dyn MediaDevices>,
    outbound: mpsc::UnboundedSender<ClientMessage>,
    notices: mpsc::UnboundedSender<Notice>,
    local_tx: mpsc::UnboundedSender<LocalCandidate>,
    local_rx: mpsc::UnboundedReceiver<LocalCandidate>,
    inflight: FuturesUnordered<BoxFuture<'static, Completion>>,
    deadlines: FuturesUnordered<BoxFuture<'static, AnswerDeadline>>,
    media_request: Option<MediaRequest>,
    next_request: u64,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        shape: Shape,
        factory: Arc<dyn PeerConnectionFactory>,
        media: Arc<dyn MediaDevices>,
        outbound: mpsc::UnboundedSender<ClientMessage>,
        notices: mpsc::UnboundedSender<Notice>,
        config: OrchestratorConfig,
    ) -> Self {
        let mode = match shape {
            Shape::Room => Mode::Room(RoomMembership::default()),
            Shape::Call { identity } => {
                let (machine, _status) = CallMachine::new();
                Mode::Call(CallSide { identity, machine })
            }
        };
        let (local_tx, local_rx) = mpsc::unbounded_channel();

        Self {
            mode,
            registry: SessionRegistry::new(),
            buffer: CandidateBuffer::new(),
            factory,
            media,
            outbound,
            notices,
            local_tx,
            local_rx,
            inflight: FuturesUnordered::new(),
            deadlines: FuturesUnordered::new(),
            media_request: None,
            next_request: 0,
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Candidates waiting for a session that does not exist yet
    pub fn buffered_candidates(&self, identity: &str) -> usize {
        self.buffer.buffered(identity)
    }

    pub fn call_state(&self) -> Option<CallState> {
        match &self.mode {
            Mode::Call(call) => Some(call.machine.state()),
            Mode::Room(_) => None,
        }
    }

    /// Live call status for the UI (1:1 shape only)
    pub fn call_status(&self) -> Option<watch::Receiver<CallStatus>> {
        match &self.mode {
            Mode::Call(call) => Some(call.machine.subscribe()),
            Mode::Room(_) => None,
        }
    }

    /// Identity our own session is keyed by, once known
    pub fn local_identity(&self) -> Option<&str> {
        match &self.mode {
            Mode::Room(room) => room.local.as_ref().map(|local| local.name.as_str()),
            Mode::Call(call) => Some(call.identity.as_str()),
        }
    }

    /// Drive the orchestrator until the user side goes away or the
    /// connection drops.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<TransportEvent>,
        mut actions: mpsc::UnboundedReceiver<UserAction>,
    ) -> Result<(), SignalError> {
        loop {
            tokio::select! {
                Some(completion) = self.inflight.next(), if !self.inflight.is_empty() => {
                    self.on_completion(completion);
                }
                Some(deadline) = self.deadlines.next(), if !self.deadlines.is_empty() => {
                    self.on_deadline(deadline);
                }
                Some(local) = self.local_rx.recv() => {
                    self.relay_local_candidate(local);
                }
                event = inbound.recv() => match event {
                    Some(TransportEvent::Message(text)) => self.handle_text(&text),
                    Some(TransportEvent::Closed(reason)) => return Err(self.connection_lost(reason)),
                    None => return Err(self.connection_lost(None)),
                },
                action = actions.recv() => match action {
                    Some(action) => self.handle_action(action),
                    None => {
                        info!("User side closed; shutting down");
                        self.shutdown();
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Process every pending completion and local candidate until nothing
    /// is left in flight. Answer deadlines are not waited for.
    pub async fn settle(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(local) = self.local_rx.try_recv() {
                self.relay_local_candidate(local);
                progressed = true;
            }
            if let Some(completion) = self.inflight.next().await {
                self.on_completion(completion);
                continue;
            }
            if !progressed {
                break;
            }
        }
    }

    /// Wait for the next armed answer deadline and handle it. Returns false
    /// when none is armed.
    pub async fn expire_next_deadline(&mut self) -> bool {
        match self.deadlines.next().await {
            Some(deadline) => {
                self.on_deadline(deadline);
                true
            }
            None => false,
        }
    }

    /// Decode and dispatch one inbound text frame
    pub fn handle_text(&mut self, text: &str) {
        debug!("Received message: {}", text);
        match codec::decode_server(text) {
            Ok(msg) => self.handle_message(msg),
            Err(CodecError::Unrecognized(kind)) => {
                let err = SignalError::UnrecognizedMessage(kind);
                warn!("{}", err);
                self.on_unrecognized(&err);
            }
            Err(CodecError::Malformed(reason)) => {
                warn!("{}", SignalError::MalformedMessage(reason));
            }
        }
    }

    pub fn handle_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::ExistingParticipants { participants } => self.on_existing_participants(participants),
            ServerMessage::NewParticipant { name, role } => self.on_new_participant(name, role),
            ServerMessage::ParticipantLeft { name } => self.on_participant_left(&name),
            ServerMessage::NegotiateAnswer { name, sdp_answer } => {
                debug!("Received SDP answer for {}", name);
                self.apply_answer(&name, sdp_answer);
            }
            ServerMessage::RemoteCandidate { name, candidate } => self.on_remote_candidate(name, candidate),
            ServerMessage::StartResponse { sdp_answer } => self.on_start_response(sdp_answer),
            ServerMessage::Error { message } => self.on_server_error(&message),
        }
    }

    pub fn handle_action(&mut self, action: UserAction) {
        match action {
            UserAction::Join { name, room, role } => self.join(name, room, role),
            UserAction::Leave => self.leave(),
            UserAction::Start => self.start_call(),
            UserAction::Stop => self.stop_call(),
        }
    }

    /// Dispose everything and forget pending work
    pub fn shutdown(&mut self) {
        let disposed = self.registry.remove_all();
        self.buffer.clear();
        self.media_request = None;
        self.inflight = FuturesUnordered::new();
        self.deadlines = FuturesUnordered::new();

        match &mut self.mode {
            Mode::Room(room) => {
                room.local = None;
                room.roster.clear();
            }
            Mode::Call(call) => {
                if call.machine.state() != CallState::CanStart {
                    call.machine.fire(CallTrigger::Failure);
                }
            }
        }
        debug!("Shutdown disposed {} sessions", disposed);
    }

    fn connection_lost(&mut self, reason: Option<String>) -> SignalError {
        let err = SignalError::ConnectionLost(reason.unwrap_or_else(|| "closed".to_string()));
        error!("{}", err);
        notify(&self.notices, Notice::error(err.to_string()));
        self.shutdown();
        err
    }

    // ------------------------------------------------------------------
    // Negotiation plumbing shared by both shapes
    // ------------------------------------------------------------------

    fn request_local_media(&mut self, purpose: MediaPurpose) {
        self.next_request += 1;
        let request = self.next_request;
        self.media_request = Some(MediaRequest { id: request, purpose });

        let media = Arc::clone(&self.media);
        self.inflight.push(
            async move {
                let result = media.acquire_local().await;
                Completion::LocalMedia { request, result }
            }
            .boxed(),
        );
    }

    /// Register a session and start creating its capability handle.
    /// The registry entry exists before any async work begins, so early
    /// candidates always have somewhere to go.
    fn start_session(&mut self, mut session: PeerSession) {
        let identity = session.identity().to_string();
        if self.registry.contains(&identity) {
            warn!("{}; replacing it", SignalError::DuplicateSession(identity.clone()));
            self.registry.remove(&identity);
        }

        let early = self.buffer.take(&identity);
        if !early.is_empty() {
            debug!("Moving {} early candidates into the session for {}", early.len(), identity);
        }
        let dropped = session.adopt_candidates(early);
        if dropped > 0 {
            warn!("Dropped {} early candidates for {}: queue full", dropped, identity);
        }

        let id = session.id();
        let binding = session.binding().clone();
        if let Err(e) = self.registry.add(session) {
            error!("{}", e);
            return;
        }
        info!("Negotiating {} session for {}", binding.direction(), identity);

        let factory = Arc::clone(&self.factory);
        let on_candidate = self.candidate_callback(&identity, id);
        self.inflight.push(
            async move {
                let result = factory.create(&identity, &binding, on_candidate).await;
                Completion::Created {
                    identity,
                    session: id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn candidate_callback(&self, identity: &str, session: SessionId) -> OnIceCandidate {
        let tx = self.local_tx.clone();
        let identity = identity.to_string();
        Arc::new(move |candidate| {
            let _ = tx.send(LocalCandidate {
                identity: identity.clone(),
                session,
                candidate,
            });
        })
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::LocalMedia { request, result } => self.on_local_media(request, result),
            Completion::Created {
                identity,
                session,
                result,
            } => self.on_created(identity, session, result),
            Completion::Offer {
                identity,
                session,
                result,
            } => self.on_offer(identity, session, result),
            Completion::Answer {
                identity,
                session,
                result,
            } => self.on_answer_applied(&identity, session, result),
            Completion::Candidate {
                identity,
                session,
                result,
            } => match result {
                Ok(()) => trace!("Candidate applied to {}", identity),
                Err(e) => self.fail_session(&identity, session, negotiation_error(&identity, e)),
            },
        }
    }

    fn on_local_media(&mut self, request: u64, result: Result<MediaStream, CapabilityError>) {
        if !matches!(&self.media_request, Some(pending) if pending.id == request) {
            debug!("Dropping stale local media result (request {})", request);
            return;
        }
        let Some(pending) = self.media_request.take() else {
            return;
        };
        match pending.purpose {
            MediaPurpose::Publish { existing } => self.on_publish_media(result, existing),
            MediaPurpose::Call => self.on_call_media(result),
        }
    }

    fn on_created(
        &mut self,
        identity: String,
        id: SessionId,
        result: Result<Arc<dyn PeerConnection>, CapabilityError>,
    ) {
        let handle = match result {
            Ok(handle) => handle,
            Err(e) => return self.fail_session(&identity, id, negotiation_error(&identity, e)),
        };

        let Some(session) = self.registry.live_mut(&identity, id) else {
            debug!("Session {} for {} went away before its handle was ready", id, identity);
            handle.dispose();
            return;
        };
        let queued = match session.attach_handle(Arc::clone(&handle)) {
            Ok(queued) => queued,
            Err(e) => {
                warn!("{}", e);
                handle.dispose();
                return;
            }
        };

        if !queued.is_empty() {
            info!("Replaying {} buffered candidates for {}", queued.len(), identity);
        }
        for candidate in queued {
            self.apply_candidate(&identity, id, Arc::clone(&handle), candidate);
        }

        self.inflight.push(
            async move {
                let result = handle.generate_offer().await;
                Completion::Offer {
                    identity,
                    session: id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn on_offer(&mut self, identity: String, id: SessionId, result: Result<String, CapabilityError>) {
        let sdp_offer = match result {
            Ok(sdp) => sdp,
            Err(e) => return self.fail_session(&identity, id, negotiation_error(&identity, e)),
        };

        let Some(session) = self.registry.live_mut(&identity, id) else {
            debug!("Offer for {} completed after its session was disposed", identity);
            return;
        };
        if let Err(e) = session.mark_offer_sent() {
            warn!("{}", e);
            return;
        }

        let msg = match &self.mode {
            Mode::Room(_) => ClientMessage::Negotiate {
                sender: identity.clone(),
                sdp_offer,
            },
            Mode::Call(_) => ClientMessage::Start { sdp_offer },
        };
        debug!("Relaying SDP offer for {}", identity);
        send(&self.outbound, msg);
        self.arm_deadline(identity, id);
    }

    fn arm_deadline(&mut self, identity: String, session: SessionId) {
        let Some(timeout) = self.config.answer_timeout else {
            return;
        };
        self.deadlines.push(
            async move {
                tokio::time::sleep(timeout).await;
                AnswerDeadline { identity, session }
            }
            .boxed(),
        );
    }

    fn on_deadline(&mut self, deadline: AnswerDeadline) {
        let AnswerDeadline { identity, session } = deadline;
        let waiting = self
            .registry
            .live_mut(&identity, session)
            .map(|s| s.phase() == SessionPhase::OfferSent)
            .unwrap_or(false);
        if !waiting {
            return;
        }
        let timeout = self.config.answer_timeout.unwrap_or_default();
        let err = SignalError::NegotiationFailure {
            identity: identity.clone(),
            reason: format!("no answer within {}s", timeout.as_secs_f32()),
        };
        self.fail_session(&identity, session, err);
    }

    fn apply_answer(&mut self, identity: &str, sdp_answer: String) {
        let session = match self.registry.get(identity) {
            Ok(session) => session,
            Err(e) => {
                warn!("Ignoring answer: {}", e);
                return;
            }
        };
        if session.phase() != SessionPhase::OfferSent {
            warn!("Ignoring answer for {} while {}", identity, session.phase());
            return;
        }
        let Some(handle) = session.handle() else {
            return;
        };

        let id = session.id();
        let identity = identity.to_string();
        self.inflight.push(
            async move {
                let result = handle.process_answer(&sdp_answer).await;
                Completion::Answer {
                    identity,
                    session: id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn on_answer_applied(&mut self, identity: &str, id: SessionId, result: Result<(), CapabilityError>) {
        if let Err(e) = result {
            return self.fail_session(identity, id, negotiation_error(identity, e));
        }
        let Some(session) = self.registry.live_mut(identity, id) else {
            debug!("Answer for {} applied after its session was disposed", identity);
            return;
        };
        if let Err(e) = session.mark_active() {
            warn!("{}", e);
            return;
        }
        info!("Session with {} is active", identity);

        if let Mode::Call(call) = &mut self.mode {
            if call.identity == identity {
                call.machine.fire(CallTrigger::AnswerApplied);
                notify(&self.notices, Notice::info("Call established"));
            }
        }
    }

    fn on_remote_candidate(&mut self, name: Option<String>, candidate: IceCandidate) {
        let Some(identity) = name.or_else(|| self.local_identity().map(str::to_string)) else {
            warn!("Dropping candidate with no target identity");
            return;
        };

        if self.registry.contains(&identity) {
            let (id, route) = match self.registry.get_mut(&identity) {
                Ok(session) => (session.id(), session.route_candidate(candidate)),
                Err(e) => {
                    warn!("{}", e);
                    return;
                }
            };
            match route {
                CandidateRoute::Apply { handle, candidate } => self.apply_candidate(&identity, id, handle, candidate),
                CandidateRoute::Queued => debug!("Queued candidate for {} until its handle exists", identity),
                CandidateRoute::Discarded => debug!("Discarding candidate for disposed session of {}", identity),
                CandidateRoute::Full => warn!("Candidate queue full for {}; dropping candidate", identity),
            }
            return;
        }

        if self.expects_no_session(&identity) {
            debug!("Discarding candidate for {}: no session will be created", identity);
            return;
        }
        match self.buffer.push(&identity, candidate) {
            BufferOutcome::Buffered => debug!("Buffering candidate for {} until its session exists", identity),
            BufferOutcome::Departed => debug!("Discarding candidate for departed {}", identity),
            BufferOutcome::Full => warn!("Candidate buffer full for {}; dropping candidate", identity),
        }
    }

    fn apply_candidate(
        &mut self,
        identity: &str,
        id: SessionId,
        handle: Arc<dyn PeerConnection>,
        candidate: IceCandidate,
    ) {
        let identity = identity.to_string();
        self.inflight.push(
            async move {
                let result = handle.add_ice_candidate(candidate).await;
                Completion::Candidate {
                    identity,
                    session: id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn relay_local_candidate(&mut self, local: LocalCandidate) {
        let LocalCandidate {
            identity,
            session,
            candidate,
        } = local;
        if self.registry.live_mut(&identity, session).is_none() {
            debug!("Dropping local candidate from disposed session of {}", identity);
            return;
        }
        debug!("Sending ICE candidate for {}", identity);
        send(
            &self.outbound,
            ClientMessage::LocalCandidate {
                candidate,
                name: identity,
            },
        );
    }

    /// Terminal failure for one session; every other session carries on
    fn fail_session(&mut self, identity: &str, id: SessionId, err: SignalError) {
        if self.registry.live_mut(identity, id).is_none() {
            debug!("Ignoring failure of stale session {} for {}: {}", id, identity, err);
            return;
        }
        error!("{}", err);
        self.registry.remove(identity);
        notify(&self.notices, Notice::error(err.to_string()));

        if let Mode::Call(call) = &mut self.mode {
            if call.identity == identity {
                self.buffer.mark_departed(identity);
                call.machine.fire(CallTrigger::Failure);
            }
        }
    }

    fn on_server_error(&mut self, message: &str) {
        error!("Coordinator error: {}", message);
        notify(&self.notices, Notice::error(format!("Server error: {}", message)));

        match &mut self.mode {
            Mode::Room(_) => {
                let stuck: Vec<String> = self
                    .registry
                    .sessions()
                    .filter(|session| session.in_flight())
                    .map(|session| session.identity().to_string())
                    .collect();
                for identity in stuck {
                    debug!("Reverting in-flight negotiation with {}", identity);
                    self.registry.remove(&identity);
                }
            }
            Mode::Call(call) => {
                // An established call is left running
                if call.machine.state() == CallState::Starting {
                    self.registry.remove(&call.identity);
                    self.buffer.mark_departed(&call.identity);
                    self.media_request = None;
                    call.machine.fire(CallTrigger::Failure);
                }
            }
        }
    }

    fn on_unrecognized(&mut self, err: &SignalError) {
        if let Mode::Call(call) = &mut self.mode {
            if call.machine.state() == CallState::Starting {
                self.registry.remove(&call.identity);
                self.buffer.mark_departed(&call.identity);
                self.media_request = None;
                call.machine.fire(CallTrigger::Failure);
                notify(&self.notices, Notice::error(format!("Call start aborted: {}", err)));
            }
        }
    }
}

fn negotiation_error(identity: &str, err: CapabilityError) -> SignalError {
    match err {
        CapabilityError::Unavailable(reason) => SignalError::CapabilityUnavailable(reason),
        CapabilityError::Failed(reason) => SignalError::NegotiationFailure {
            identity: identity.to_string(),
            reason,
        },
    }
}

fn send(outbound: &mpsc::UnboundedSender<ClientMessage>, msg: ClientMessage) {
    trace!("Sending {}", msg.kind());
    if outbound.send(msg).is_err() {
        debug!("Outbound channel closed; message dropped");
    }
}

fn notify(notices: &mpsc::UnboundedSender<Notice>, notice: Notice) {
    let _ = notices.send(notice);
}
