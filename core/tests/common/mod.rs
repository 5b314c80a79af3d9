// Shared harness: an orchestrator wired to fake collaborators and channels

#![allow(dead_code)]

use confsignal_core::message::{ClientMessage, IceCandidate, ParticipantInfo, Role, ServerMessage};
use confsignal_core::orchestrator::{Notice, NoticeLevel, Orchestrator, OrchestratorConfig, Shape, UserAction};
use confsignal_core::testing::{FakeEngine, FakeMedia};
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Harness {
    pub orch: Orchestrator,
    pub engine: FakeEngine,
    pub media: FakeMedia,
    outbound: mpsc::UnboundedReceiver<ClientMessage>,
    notices: mpsc::UnboundedReceiver<Notice>,
}

impl Harness {
    pub fn room() -> Self {
        Self::new(Shape::Room, OrchestratorConfig::default())
    }

    pub fn call() -> Self {
        Self::new(
            Shape::Call {
                identity: "remote".into(),
            },
            OrchestratorConfig::default(),
        )
    }

    pub fn new(shape: Shape, config: OrchestratorConfig) -> Self {
        init_tracing();
        let engine = FakeEngine::new();
        let media = FakeMedia::new();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let orch = Orchestrator::new(
            shape,
            Arc::new(engine.clone()),
            Arc::new(media.clone()),
            outbound_tx,
            notice_tx,
            config,
        );
        Self {
            orch,
            engine,
            media,
            outbound,
            notices,
        }
    }

    /// Everything sent to the coordinator since the last call
    pub fn sent(&mut self) -> Vec<ClientMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = self.outbound.try_recv() {
            out.push(msg);
        }
        out
    }

    pub fn notices(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = self.notices.try_recv() {
            out.push(notice);
        }
        out
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.notices()
            .into_iter()
            .filter(|n| n.level == NoticeLevel::Error)
            .map(|n| n.text)
            .collect()
    }

    pub fn inbound(&mut self, msg: ServerMessage) {
        self.orch.handle_message(msg);
    }

    pub async fn settle(&mut self) {
        self.orch.settle().await;
    }

    /// Join and receive the participant list, then let negotiation run
    pub async fn join(&mut self, name: &str, role: Role, existing: Vec<ParticipantInfo>) {
        self.orch.handle_action(UserAction::Join {
            name: name.into(),
            room: "room1".into(),
            role,
        });
        self.inbound(ServerMessage::ExistingParticipants { participants: existing });
        self.settle().await;
    }

    pub fn sessions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.orch.registry().identities().map(str::to_string).collect();
        names.sort();
        names
    }
}

/// Send core logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn publisher(name: &str) -> ParticipantInfo {
    ParticipantInfo::new(name, Role::Publisher)
}

pub fn viewer(name: &str) -> ParticipantInfo {
    ParticipantInfo::new(name, Role::Viewer)
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000 typ host", n, n),
        Some("0".into()),
        Some(0),
    )
}

pub fn remote_candidate(name: &str, n: u32) -> ServerMessage {
    ServerMessage::RemoteCandidate {
        name: Some(name.into()),
        candidate: candidate(n),
    }
}

pub fn answer_for(name: &str) -> ServerMessage {
    ServerMessage::NegotiateAnswer {
        name: name.into(),
        sdp_answer: format!("answer-{}", name),
    }
}

/// Names of the sessions an outbound batch negotiated for
pub fn negotiated(sent: &[ClientMessage]) -> Vec<String> {
    let mut names: Vec<String> = sent
        .iter()
        .filter_map(|msg| match msg {
            ClientMessage::Negotiate { sender, .. } => Some(sender.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}
