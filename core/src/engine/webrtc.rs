// WebRTC engine — `PeerConnectionFactory` backed by webrtc-rs

use crate::capability::{CapabilityError, MediaBinding, OnIceCandidate, PeerConnection, PeerConnectionFactory};
use crate::message::IceCandidate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

fn failed(context: &str, e: webrtc::Error) -> CapabilityError {
    CapabilityError::Failed(format!("{}: {}", context, e))
}

#[derive(Debug, Clone)]
pub struct WebRtcEngine {
    ice_servers: Vec<String>,
}

impl WebRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }

    fn build_api() -> Result<API, CapabilityError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| failed("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| failed("register interceptors", e))?;

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcEngine {
    async fn create(
        &self,
        identity: &str,
        binding: &MediaBinding,
        on_candidate: OnIceCandidate,
    ) -> Result<Arc<dyn PeerConnection>, CapabilityError> {
        let api = Self::build_api()?;
        let pc = Arc::new(
            api.new_peer_connection(self.rtc_config())
                .await
                .map_err(|e| failed("create peer connection", e))?,
        );

        let direction = match binding {
            MediaBinding::SendOnly { .. } => RTCRtpTransceiverDirection::Sendonly,
            MediaBinding::ReceiveOnly { .. } => RTCRtpTransceiverDirection::Recvonly,
            MediaBinding::SendReceive { .. } => RTCRtpTransceiverDirection::Sendrecv,
        };
        let init = RTCRtpTransceiverInit {
            direction,
            send_encodings: vec![],
        };

        let track = match binding.stream() {
            Some(stream) => {
                let track = Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_VP8.to_owned(),
                        ..Default::default()
                    },
                    "video".to_owned(),
                    stream.id.clone(),
                ));
                pc.add_transceiver_from_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>, Some(init))
                    .await
                    .map_err(|e| failed("add video track", e))?;
                Some(track)
            }
            None => {
                pc.add_transceiver_from_kind(RTPCodecType::Video, Some(init))
                    .await
                    .map_err(|e| failed("add video transceiver", e))?;
                None
            }
        };

        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let on_candidate = Arc::clone(&on_candidate);
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => on_candidate(IceCandidate::new(init.candidate, init.sdp_mid, init.sdp_mline_index)),
                    Err(e) => warn!("Failed to serialise local candidate: {}", e),
                }
            })
        }));

        if let Some(element) = binding.remote_element().cloned() {
            let peer = identity.to_string();
            pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
                info!("Remote {} track from {}", remote.kind(), peer);
                element.attach(&remote.id());
                Box::pin(async {})
            }));
        }

        debug!("Created {} peer connection for {}", binding.direction(), identity);
        Ok(Arc::new(WebRtcPeer {
            identity: identity.to_string(),
            pc,
            _track: track,
            pending: Mutex::new(Some(Vec::new())),
            disposed: AtomicBool::new(false),
        }))
    }
}

pub struct WebRtcPeer {
    identity: String,
    pc: Arc<RTCPeerConnection>,
    _track: Option<Arc<TrackLocalStaticSample>>,
    /// Remote candidates held until the answer is applied; `None` afterwards
    pending: Mutex<Option<Vec<IceCandidate>>>,
    disposed: AtomicBool,
}

impl WebRtcPeer {
    async fn apply(&self, candidate: IceCandidate) -> Result<(), CapabilityError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| failed("add ice candidate", e))
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn generate_offer(&self) -> Result<String, CapabilityError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| failed("create offer", e))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| failed("set local description", e))?;
        Ok(sdp)
    }

    async fn process_answer(&self, sdp_answer: &str) -> Result<(), CapabilityError> {
        let answer = RTCSessionDescription::answer(sdp_answer.to_string()).map_err(|e| failed("parse answer", e))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| failed("set remote description", e))?;

        let queued = self.pending.lock().take().unwrap_or_default();
        if !queued.is_empty() {
            debug!("Applying {} candidates held for {}", queued.len(), self.identity);
        }
        for candidate in queued {
            self.apply(candidate).await?;
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), CapabilityError> {
        {
            let mut pending = self.pending.lock();
            if let Some(queue) = pending.as_mut() {
                queue.push(candidate);
                return Ok(());
            }
        }
        self.apply(candidate).await
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to close the connection for {}", self.identity);
            return;
        };
        let pc = Arc::clone(&self.pc);
        let identity = self.identity.clone();
        runtime.spawn(async move {
            if let Err(e) = pc.close().await {
                warn!("Closing connection for {} failed: {}", identity, e);
            }
        });
    }
}
