// 1:1 call shape — start/stop gated by the call state machine

use super::{notify, send, MediaPurpose, Mode, Notice, Orchestrator};
use crate::call::{CallState, CallTrigger};
use crate::capability::{CapabilityError, MediaStream};
use crate::message::ClientMessage;
use crate::session::PeerSession;
use crate::SignalError;
use tracing::{error, info, warn};

impl Orchestrator {
    pub(super) fn start_call(&mut self) {
        let Mode::Call(call) = &mut self.mode else {
            warn!("Start is only available in the call shape");
            return;
        };
        if let Err(e) = call.machine.check(CallTrigger::Start) {
            warn!("{}", e);
            notify(&self.notices, Notice::error(e.to_string()));
            return;
        }
        call.machine.fire(CallTrigger::Start);
        self.buffer.mark_present(&call.identity);

        info!("Starting call with {}", call.identity);
        self.request_local_media(MediaPurpose::Call);
    }

    pub(super) fn on_call_media(&mut self, result: Result<MediaStream, CapabilityError>) {
        let Mode::Call(call) = &mut self.mode else {
            return;
        };
        if call.machine.state() != CallState::Starting {
            info!("Call no longer starting; dropping captured stream");
            return;
        }
        let identity = call.identity.clone();

        match result {
            Ok(stream) => {
                let local = self.media.local_element();
                let remote = self.media.remote_element(&identity);
                let id = self.registry.next_session_id();
                self.start_session(PeerSession::send_receive(id, identity, stream, local, remote));
            }
            Err(e) => {
                let err = match e {
                    CapabilityError::Unavailable(reason) | CapabilityError::Failed(reason) => {
                        SignalError::CapabilityUnavailable(reason)
                    }
                };
                error!("Cannot start call: {}", err);
                self.buffer.mark_departed(&identity);
                call.machine.fire(CallTrigger::Failure);
                notify(&self.notices, Notice::error(format!("Cannot start call: {}", err)));
            }
        }
    }

    pub(super) fn stop_call(&mut self) {
        let Mode::Call(call) = &mut self.mode else {
            warn!("Stop is only available in the call shape");
            return;
        };
        if let Err(e) = call.machine.check(CallTrigger::Stop) {
            warn!("{}", e);
            notify(&self.notices, Notice::error(e.to_string()));
            return;
        }
        call.machine.fire(CallTrigger::Stop);

        info!("Stopping call with {}", call.identity);
        send(&self.outbound, ClientMessage::Stop);
        self.registry.remove(&call.identity);
        // Trickle from the stopped attempt must not reach the next one
        self.buffer.mark_departed(&call.identity);
        notify(&self.notices, Notice::info("Call stopped"));
    }

    pub(super) fn on_start_response(&mut self, sdp_answer: String) {
        let identity = match &self.mode {
            Mode::Call(call) => call.identity.clone(),
            Mode::Room(_) => {
                warn!("Ignoring startResponse in the room shape");
                return;
            }
        };
        info!("SDP answer received from server");
        self.apply_answer(&identity, sdp_answer);
    }
}
