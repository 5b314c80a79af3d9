//! In-memory engine and media fakes for exercising the orchestrator
//!
//! `FakeEngine` records every capability call per identity and can be told
//! to fail specific operations. `FakeMedia` hands out render targets that
//! count how often they were detached.

use crate::capability::{
    CapabilityError, Direction, MediaBinding, MediaDevices, MediaElement, MediaStream, OnIceCandidate,
    PeerConnection, PeerConnectionFactory,
};
use crate::message::IceCandidate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct EngineState {
    unavailable: bool,
    fail_create: HashSet<String>,
    fail_offer: HashSet<String>,
    fail_answer: HashSet<String>,
    fail_candidate: HashSet<String>,
    created: HashMap<String, usize>,
    disposed: HashMap<String, usize>,
    offers: HashMap<String, usize>,
    answers: HashMap<String, Vec<String>>,
    candidates: HashMap<String, Vec<IceCandidate>>,
    directions: HashMap<String, Direction>,
    callbacks: HashMap<String, OnIceCandidate>,
}

/// Peer-connection engine that only keeps books
#[derive(Clone, Default)]
pub struct FakeEngine {
    state: Arc<Mutex<EngineState>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle for `identity` outside of any factory call
    pub fn peer(&self, identity: &str) -> Arc<dyn PeerConnection> {
        Arc::new(FakePeer {
            identity: identity.to_string(),
            state: Arc::clone(&self.state),
            disposed: AtomicBool::new(false),
        })
    }

    /// Every `create` fails with `Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn fail_create_for(&self, identity: &str) {
        self.state.lock().fail_create.insert(identity.to_string());
    }

    pub fn fail_offer_for(&self, identity: &str) {
        self.state.lock().fail_offer.insert(identity.to_string());
    }

    pub fn fail_answer_for(&self, identity: &str) {
        self.state.lock().fail_answer.insert(identity.to_string());
    }

    pub fn fail_candidates_for(&self, identity: &str) {
        self.state.lock().fail_candidate.insert(identity.to_string());
    }

    pub fn created_count(&self, identity: &str) -> usize {
        self.state.lock().created.get(identity).copied().unwrap_or(0)
    }

    pub fn dispose_count(&self, identity: &str) -> usize {
        self.state.lock().disposed.get(identity).copied().unwrap_or(0)
    }

    pub fn offer_count(&self, identity: &str) -> usize {
        self.state.lock().offers.get(identity).copied().unwrap_or(0)
    }

    pub fn answers(&self, identity: &str) -> Vec<String> {
        self.state.lock().answers.get(identity).cloned().unwrap_or_default()
    }

    /// Remote candidates applied to handles for `identity`, in order
    pub fn applied_candidates(&self, identity: &str) -> Vec<IceCandidate> {
        self.state.lock().candidates.get(identity).cloned().unwrap_or_default()
    }

    pub fn direction(&self, identity: &str) -> Option<Direction> {
        self.state.lock().directions.get(identity).copied()
    }

    /// Simulate the engine gathering a local candidate. Returns false when
    /// no handle was ever created for `identity`.
    pub fn emit_local_candidate(&self, identity: &str, candidate: IceCandidate) -> bool {
        let callback = self.state.lock().callbacks.get(identity).cloned();
        match callback {
            Some(callback) => {
                callback(candidate);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeEngine {
    async fn create(
        &self,
        identity: &str,
        binding: &MediaBinding,
        on_candidate: OnIceCandidate,
    ) -> Result<Arc<dyn PeerConnection>, CapabilityError> {
        {
            let mut state = self.state.lock();
            if state.unavailable {
                return Err(CapabilityError::Unavailable("no peer-connection engine".into()));
            }
            if state.fail_create.contains(identity) {
                return Err(CapabilityError::Failed(format!("create refused for {}", identity)));
            }
            *state.created.entry(identity.to_string()).or_default() += 1;
            state.directions.insert(identity.to_string(), binding.direction());
            state.callbacks.insert(identity.to_string(), on_candidate);
        }
        Ok(self.peer(identity))
    }
}

struct FakePeer {
    identity: String,
    state: Arc<Mutex<EngineState>>,
    disposed: AtomicBool,
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn generate_offer(&self) -> Result<String, CapabilityError> {
        let mut state = self.state.lock();
        if state.fail_offer.contains(&self.identity) {
            return Err(CapabilityError::Failed("offer generation failed".into()));
        }
        *state.offers.entry(self.identity.clone()).or_default() += 1;
        Ok(format!("offer-{}", self.identity))
    }

    async fn process_answer(&self, sdp_answer: &str) -> Result<(), CapabilityError> {
        let mut state = self.state.lock();
        if state.fail_answer.contains(&self.identity) {
            return Err(CapabilityError::Failed("answer rejected".into()));
        }
        state
            .answers
            .entry(self.identity.clone())
            .or_default()
            .push(sdp_answer.to_string());
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CapabilityError> {
        let mut state = self.state.lock();
        if state.fail_candidate.contains(&self.identity) {
            return Err(CapabilityError::Failed("candidate rejected".into()));
        }
        state.candidates.entry(self.identity.clone()).or_default().push(candidate);
        Ok(())
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            *self.state.lock().disposed.entry(self.identity.clone()).or_default() += 1;
        }
    }
}

/// Render target that remembers what happened to it
pub struct FakeElement {
    label: String,
    attached: Mutex<Option<String>>,
    detaches: AtomicUsize,
}

impl FakeElement {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            attached: Mutex::new(None),
            detaches: AtomicUsize::new(0),
        }
    }

    pub fn attached(&self) -> Option<String> {
        self.attached.lock().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl MediaElement for FakeElement {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn attach(&self, track_id: &str) {
        *self.attached.lock() = Some(track_id.to_string());
    }

    fn detach(&self) {
        *self.attached.lock() = None;
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct MediaState {
    capture_unavailable: bool,
    acquired: usize,
    local: Option<Arc<FakeElement>>,
    remote: HashMap<String, Arc<FakeElement>>,
}

/// Capture devices and render targets
#[derive(Clone, Default)]
pub struct FakeMedia {
    state: Arc<Mutex<MediaState>>,
}

impl FakeMedia {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_capture_unavailable(&self, unavailable: bool) {
        self.state.lock().capture_unavailable = unavailable;
    }

    /// Successful captures so far
    pub fn acquired(&self) -> usize {
        self.state.lock().acquired
    }

    pub fn element(&self, identity: &str) -> Option<Arc<FakeElement>> {
        self.state.lock().remote.get(identity).cloned()
    }

    pub fn detach_count(&self, identity: &str) -> usize {
        self.element(identity).map(|e| e.detach_count()).unwrap_or(0)
    }

    pub fn local_detach_count(&self) -> usize {
        self.state.lock().local.as_ref().map(|e| e.detach_count()).unwrap_or(0)
    }
}

#[async_trait]
impl MediaDevices for FakeMedia {
    async fn acquire_local(&self) -> Result<MediaStream, CapabilityError> {
        let mut state = self.state.lock();
        if state.capture_unavailable {
            return Err(CapabilityError::Unavailable("screen capture not supported".into()));
        }
        state.acquired += 1;
        Ok(MediaStream::video(format!("local-{}", state.acquired)))
    }

    fn local_element(&self) -> Option<Arc<dyn MediaElement>> {
        let mut state = self.state.lock();
        let element = state
            .local
            .get_or_insert_with(|| Arc::new(FakeElement::new("local")))
            .clone();
        Some(element)
    }

    fn remote_element(&self, identity: &str) -> Arc<dyn MediaElement> {
        let mut state = self.state.lock();
        let element = state
            .remote
            .entry(identity.to_string())
            .or_insert_with(|| Arc::new(FakeElement::new(identity)))
            .clone();
        element
    }
}
