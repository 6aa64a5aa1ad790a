//! Peer session abstraction
//
// These traits cover the five session operations the listener needs.
// Keeping them object-safe allows tests to substitute an in-memory
// session (see [`crate::mock`]) and drive inbound tracks deterministically.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SessionError;
use crate::types::{PayloadType, Ssrc};

/// Future returned by the inbound-track handler.
pub type OnTrackFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback invoked by the session whenever the remote peer publishes a
/// new media track.
pub type OnTrackHandler =
    Box<dyn FnMut(Arc<dyn RemoteTrack>, Arc<dyn RtpReceiver>) -> OnTrackFuture + Send + Sync>;

/// An inbound media track owned by the remote publisher.
#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;

    /// Media stream label the track belongs to. Audio and video tracks
    /// from the same stream share a label.
    fn label(&self) -> String;

    fn payload_type(&self) -> PayloadType;

    fn ssrc(&self) -> Ssrc;

    /// Read one RTP packet into `buf`, returning the number of bytes read.
    async fn read(&self, buf: &mut [u8]) -> std::result::Result<usize, SessionError>;
}

/// A locally-owned forwarding track fed by the listener and consumed by
/// subscriber sessions.
#[async_trait]
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> String;

    fn label(&self) -> String;

    fn payload_type(&self) -> PayloadType;

    fn ssrc(&self) -> Ssrc;

    /// Write one RTP packet. `SessionError::ClosedPipe` means no
    /// subscribers are attached; callers must not retain `data` past the
    /// call.
    async fn write(&self, data: &[u8]) -> std::result::Result<usize, SessionError>;
}

/// Handle returned when a local track is attached to a session. Resolves
/// the attachment on removal.
pub trait RtpSender: Send + Sync {
    fn track_id(&self) -> String;
}

/// Receiver handed to the inbound-track callback alongside the track.
pub trait RtpReceiver: Send + Sync {}

/// A single peer's established WebRTC session.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Register the inbound-track handler. Replaces any previous handler.
    fn on_track(&self, handler: OnTrackHandler);

    /// Attach a send-only track, returning its sender handle.
    async fn add_track(
        &self,
        track: Arc<dyn LocalTrack>,
    ) -> std::result::Result<Arc<dyn RtpSender>, SessionError>;

    /// Detach a previously attached track.
    async fn remove_track(&self, sender: &Arc<dyn RtpSender>)
        -> std::result::Result<(), SessionError>;

    /// Create a locally-owned forwarding track with the given codec
    /// parameters and identity.
    async fn new_track(
        &self,
        payload_type: PayloadType,
        ssrc: Ssrc,
        id: String,
        label: String,
    ) -> std::result::Result<Arc<dyn LocalTrack>, SessionError>;

    /// Write a batch of RTCP control packets upstream.
    async fn write_rtcp(
        &self,
        packets: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
    ) -> std::result::Result<(), SessionError>;
}
