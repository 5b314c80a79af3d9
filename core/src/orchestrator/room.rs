// Room shape — membership, publishing and subscribing

use super::{notify, send, LocalMember, MediaPurpose, Mode, Notice, Orchestrator};
use crate::capability::{CapabilityError, MediaStream};
use crate::message::{ClientMessage, ParticipantInfo, Role};
use crate::session::PeerSession;
use crate::SignalError;
use tracing::{debug, error, info, warn};

impl Orchestrator {
    pub(super) fn join(&mut self, name: String, room_name: String, role: Role) {
        let Mode::Room(room) = &mut self.mode else {
            warn!("Join is only available in the room shape");
            return;
        };
        if let Some(local) = &room.local {
            let text = format!("Already in room {} as {}", local.room, local.name);
            warn!("{}", text);
            notify(&self.notices, Notice::error(text));
            return;
        }

        info!("Joining room {} as {} ({})", room_name, name, role);
        room.local = Some(LocalMember {
            name: name.clone(),
            room: room_name.clone(),
            role,
        });
        room.roster.clear();
        self.buffer.clear();
        send(
            &self.outbound,
            ClientMessage::JoinRoom {
                name,
                room: room_name,
                role,
            },
        );
    }

    pub(super) fn leave(&mut self) {
        let Mode::Room(room) = &mut self.mode else {
            warn!("Leave is only available in the room shape");
            return;
        };
        let Some(local) = room.local.take() else {
            notify(&self.notices, Notice::error("Not in a room"));
            return;
        };
        room.roster.clear();

        info!("Leaving room {}", local.room);
        send(&self.outbound, ClientMessage::LeaveRoom);
        let disposed = self.registry.remove_all();
        self.buffer.clear();
        self.media_request = None;
        debug!("Disposed {} sessions on leave", disposed);
        notify(&self.notices, Notice::info(format!("Left room {}", local.room)));
    }

    pub(super) fn on_existing_participants(&mut self, participants: Vec<ParticipantInfo>) {
        let Mode::Room(room) = &mut self.mode else {
            warn!("Ignoring existingParticipants outside a room");
            return;
        };
        let Some(local) = room.local.clone() else {
            warn!("Ignoring existingParticipants before join");
            return;
        };
        for participant in &participants {
            if participant.name != local.name {
                room.roster.insert(participant.name.clone(), participant.role);
            }
        }
        for participant in &participants {
            self.buffer.mark_present(&participant.name);
        }

        info!("Joined room {} with {} participants", local.room, participants.len());
        notify(
            &self.notices,
            Notice::info(format!(
                "Joined room {} ({} others present)",
                local.room,
                participants.len()
            )),
        );

        if local.role.publishes() {
            self.request_local_media(MediaPurpose::Publish {
                existing: participants,
            });
        } else {
            self.subscribe_all(&participants);
        }
    }

    pub(super) fn on_publish_media(
        &mut self,
        result: Result<MediaStream, CapabilityError>,
        existing: Vec<ParticipantInfo>,
    ) {
        let local_name = match &self.mode {
            Mode::Room(room) => room.local.as_ref().map(|local| local.name.clone()),
            Mode::Call(_) => None,
        };
        let Some(local_name) = local_name else {
            return;
        };

        match result {
            Ok(stream) => {
                let preview = self.media.local_element();
                let id = self.registry.next_session_id();
                self.start_session(PeerSession::send_only(id, &local_name, stream, preview));
            }
            Err(e) => {
                let err = match e {
                    CapabilityError::Unavailable(reason) | CapabilityError::Failed(reason) => {
                        SignalError::CapabilityUnavailable(reason)
                    }
                };
                error!("Cannot publish: {}", err);
                notify(&self.notices, Notice::error(format!("Cannot publish: {}", err)));
            }
        }

        // Viewing others does not depend on our own capture. Members that
        // left or re-arrived while capture was pending are already handled.
        let remaining: Vec<(String, Role)> = match &self.mode {
            Mode::Room(room) => existing
                .iter()
                .filter_map(|p| room.roster.get(&p.name).map(|role| (p.name.clone(), *role)))
                .filter(|(name, _)| !self.registry.contains(name))
                .collect(),
            Mode::Call(_) => Vec::new(),
        };
        for (name, role) in remaining {
            self.subscribe(&name, role);
        }
    }

    pub(super) fn on_new_participant(&mut self, name: String, role: Role) {
        let Mode::Room(room) = &mut self.mode else {
            warn!("Ignoring newParticipantArrived outside a room");
            return;
        };
        let Some(local) = &room.local else {
            warn!("Ignoring newParticipantArrived before join");
            return;
        };
        if local.name == name {
            debug!("Ignoring arrival announcement for ourselves");
            return;
        }
        room.roster.insert(name.clone(), role);
        self.buffer.mark_present(&name);

        info!("Participant {} arrived as {}", name, role);
        notify(&self.notices, Notice::info(format!("{} joined as {}", name, role)));

        if self.registry.contains(&name) {
            warn!("{} arrived again; replacing its session", name);
            self.registry.remove(&name);
        }
        self.subscribe(&name, role);
    }

    pub(super) fn on_participant_left(&mut self, name: &str) {
        let Mode::Room(room) = &mut self.mode else {
            warn!("Ignoring participantLeft outside a room");
            return;
        };
        room.roster.remove(name);

        let removed = self.registry.remove(name);
        let released = self.buffer.mark_departed(name);
        info!(
            "Participant {} left (session removed: {}, buffered candidates released: {})",
            name, removed, released
        );
        notify(&self.notices, Notice::info(format!("{} left", name)));
    }

    fn subscribe_all(&mut self, participants: &[ParticipantInfo]) {
        for participant in participants {
            self.subscribe(&participant.name, participant.role);
        }
    }

    /// Open a receive-only session toward a publishing member
    fn subscribe(&mut self, name: &str, role: Role) {
        if self.local_identity() == Some(name) {
            return;
        }
        if !role.publishes() {
            debug!("Not subscribing to {}: viewers have no media", name);
            return;
        }
        let element = self.media.remote_element(name);
        let id = self.registry.next_session_id();
        self.start_session(PeerSession::receive_only(id, name, element));
    }

    /// True when a candidate for `identity` can never find a session
    pub(super) fn expects_no_session(&self, identity: &str) -> bool {
        let Mode::Room(room) = &self.mode else {
            return false;
        };
        if let Some(local) = &room.local {
            if local.name == identity {
                return !local.role.publishes();
            }
        }
        matches!(room.roster.get(identity), Some(role) if !role.publishes())
    }
}
