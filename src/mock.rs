//! In-memory peer session fakes for tests
//
// Mirrors the session trait surface without a WebRTC stack: tracks are
// fed from vectors, writes are recorded, and failures can be injected
// per operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};

use crate::error::SessionError;
use crate::session::{
    LocalTrack, OnTrackHandler, PeerSession, RemoteTrack, RtpReceiver, RtpSender,
};
use crate::types::{PayloadType, Ssrc};

/// Remote track backed by an in-memory packet queue.
///
/// Tests push packets with [`feed`](Self::feed) and end the stream with
/// [`close`](Self::close), after which reads fail with
/// [`SessionError::Closed`].
pub struct MockRemoteTrack {
    id: String,
    label: String,
    payload_type: PayloadType,
    ssrc: Ssrc,
    packets_tx: SyncMutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    packets_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MockRemoteTrack {
    #[must_use]
    pub fn new(id: &str, label: &str, payload_type: PayloadType, ssrc: Ssrc) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            id: id.to_string(),
            label: label.to_string(),
            payload_type,
            ssrc,
            packets_tx: SyncMutex::new(Some(tx)),
            packets_rx: Mutex::new(rx),
        }
    }

    /// Queue one inbound RTP packet.
    pub fn feed(&self, packet: Vec<u8>) {
        if let Some(tx) = self.packets_tx.lock().as_ref() {
            let _ = tx.send(packet);
        }
    }

    /// End the stream; pending packets are still delivered first.
    pub fn close(&self) {
        self.packets_tx.lock().take();
    }
}

#[async_trait]
impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    async fn read(&self, buf: &mut [u8]) -> std::result::Result<usize, SessionError> {
        match self.packets_rx.lock().await.recv().await {
            Some(packet) => {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                Ok(n)
            }
            None => Err(SessionError::Closed),
        }
    }
}

/// Local track that records every packet written to it.
pub struct MockLocalTrack {
    id: String,
    label: String,
    payload_type: PayloadType,
    ssrc: Ssrc,
    written: SyncMutex<Vec<Vec<u8>>>,
    closed_pipe: AtomicBool,
}

impl MockLocalTrack {
    #[must_use]
    pub fn new(id: &str, label: &str, payload_type: PayloadType, ssrc: Ssrc) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            payload_type,
            ssrc,
            written: SyncMutex::new(Vec::new()),
            closed_pipe: AtomicBool::new(false),
        }
    }

    /// Packets written so far, in order.
    #[must_use]
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written.lock().clone()
    }

    /// When set, writes fail with [`SessionError::ClosedPipe`].
    pub fn set_closed_pipe(&self, closed: bool) {
        self.closed_pipe.store(closed, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalTrack for MockLocalTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    fn payload_type(&self) -> PayloadType {
        self.payload_type
    }

    fn ssrc(&self) -> Ssrc {
        self.ssrc
    }

    async fn write(&self, data: &[u8]) -> std::result::Result<usize, SessionError> {
        if self.closed_pipe.load(Ordering::SeqCst) {
            return Err(SessionError::ClosedPipe);
        }
        self.written.lock().push(data.to_vec());
        Ok(data.len())
    }
}

/// Sender handle recorded by [`MockPeerSession::add_track`].
pub struct MockRtpSender {
    track_id: String,
}

impl RtpSender for MockRtpSender {
    fn track_id(&self) -> String {
        self.track_id.clone()
    }
}

/// Receiver handed to the inbound-track handler.
pub struct MockRtpReceiver;

impl RtpReceiver for MockRtpReceiver {}

/// In-memory [`PeerSession`] recording every operation.
#[derive(Default)]
pub struct MockPeerSession {
    handler: SyncMutex<Option<OnTrackHandler>>,

    created_tracks: SyncMutex<Vec<Arc<MockLocalTrack>>>,
    attached: SyncMutex<Vec<String>>,
    detached: SyncMutex<Vec<String>>,
    rtcp_ssrcs: SyncMutex<Vec<Ssrc>>,

    fail_new_track: AtomicBool,
    fail_add_track: AtomicBool,
    fail_remove_track: AtomicBool,
    fail_write_rtcp: AtomicBool,
}

impl MockPeerSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the registered inbound-track handler, as the session would
    /// on SRTP arrival, and wait for it to finish.
    pub async fn dispatch_track(&self, remote: Arc<dyn RemoteTrack>) {
        let fut = {
            let mut handler = self.handler.lock();
            match handler.as_mut() {
                Some(handler) => handler(remote, Arc::new(MockRtpReceiver)),
                None => return,
            }
        };
        fut.await;
    }

    /// Local tracks created through [`PeerSession::new_track`], in order.
    #[must_use]
    pub fn created_tracks(&self) -> Vec<Arc<MockLocalTrack>> {
        self.created_tracks.lock().clone()
    }

    /// Ids of tracks attached through [`PeerSession::add_track`].
    #[must_use]
    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().clone()
    }

    /// Ids of tracks detached through [`PeerSession::remove_track`].
    #[must_use]
    pub fn detached(&self) -> Vec<String> {
        self.detached.lock().clone()
    }

    /// Media SSRCs of every RTCP packet written, in order.
    #[must_use]
    pub fn rtcp_ssrcs(&self) -> Vec<Ssrc> {
        self.rtcp_ssrcs.lock().clone()
    }

    #[must_use]
    pub fn rtcp_write_count(&self) -> usize {
        self.rtcp_ssrcs.lock().len()
    }

    pub fn fail_new_track(&self, fail: bool) {
        self.fail_new_track.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_track(&self, fail: bool) {
        self.fail_add_track.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove_track(&self, fail: bool) {
        self.fail_remove_track.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write_rtcp(&self, fail: bool) {
        self.fail_write_rtcp.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerSession for MockPeerSession {
    fn on_track(&self, handler: OnTrackHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn add_track(
        &self,
        track: Arc<dyn LocalTrack>,
    ) -> std::result::Result<Arc<dyn RtpSender>, SessionError> {
        if self.fail_add_track.load(Ordering::SeqCst) {
            return Err(SessionError::Other("transceiver rejected".to_string()));
        }
        let track_id = track.id();
        self.attached.lock().push(track_id.clone());
        Ok(Arc::new(MockRtpSender { track_id }))
    }

    async fn remove_track(
        &self,
        sender: &Arc<dyn RtpSender>,
    ) -> std::result::Result<(), SessionError> {
        if self.fail_remove_track.load(Ordering::SeqCst) {
            return Err(SessionError::Other("sender not negotiated".to_string()));
        }
        self.detached.lock().push(sender.track_id());
        Ok(())
    }

    async fn new_track(
        &self,
        payload_type: PayloadType,
        ssrc: Ssrc,
        id: String,
        label: String,
    ) -> std::result::Result<Arc<dyn LocalTrack>, SessionError> {
        if self.fail_new_track.load(Ordering::SeqCst) {
            return Err(SessionError::Other("unsupported payload type".to_string()));
        }
        let track = Arc::new(MockLocalTrack::new(&id, &label, payload_type, ssrc));
        self.created_tracks.lock().push(Arc::clone(&track));
        Ok(track)
    }

    async fn write_rtcp(
        &self,
        packets: &[Box<dyn rtcp::packet::Packet + Send + Sync>],
    ) -> std::result::Result<(), SessionError> {
        if self.fail_write_rtcp.load(Ordering::SeqCst) {
            return Err(SessionError::Other("transport closed".to_string()));
        }
        let mut ssrcs = self.rtcp_ssrcs.lock();
        for packet in packets {
            ssrcs.extend(packet.destination_ssrc());
        }
        Ok(())
    }
}
