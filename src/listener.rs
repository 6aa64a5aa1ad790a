//! Per-publisher track listener
//!
//! A `TrackListener` owns one publisher's media session. Every track the
//! publisher sends is republished as a locally-owned forwarding track,
//! announced to the router over the event channel, and pumped packet by
//! packet by a dedicated forwarding task. A companion task requests a
//! fresh keyframe from the publisher on an interval so that subscribers
//! joining mid-stream do not stall.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::{Error, Result, SessionError};
use crate::event::{TrackEvent, TrackEventKind};
use crate::ids::new_base62_id;
use crate::session::{LocalTrack, OnTrackFuture, PeerSession, RemoteTrack, RtpSender};
use crate::types::{ClientId, Ssrc, TrackId};

/// Listens to one publisher's session and republishes its media.
///
/// Dropped tracks and listener teardown are announced on the channel
/// returned by [`events`](Self::events); the lifetime of every internal
/// task is bounded by [`close`](Self::close).
pub struct TrackListener {
    client_id: ClientId,
    session: Arc<dyn PeerSession>,
    config: ListenerConfig,

    /// Forwarding tracks alive for this publisher, in arrival order.
    /// Append-only; entries are never mutated in place.
    local_tracks: RwLock<Vec<Arc<dyn LocalTrack>>>,

    /// Sender handles for tracks attached via [`add_track`](Self::add_track).
    /// The lock also serialises attach and detach against the session.
    senders: Mutex<HashMap<TrackId, Arc<dyn RtpSender>>>,

    /// Retained send half of the event channel; taken on close so the
    /// receiver sees end-of-stream once per-track workers have exited.
    events_tx: parking_lot::Mutex<Option<mpsc::Sender<TrackEvent>>>,
    events_rx: Arc<Mutex<mpsc::Receiver<TrackEvent>>>,

    cancel: CancellationToken,
}

impl TrackListener {
    /// Create a listener for `client_id` and register its inbound-track
    /// handler on `session`. Performs no I/O and does not block.
    pub fn new(
        client_id: impl Into<ClientId>,
        session: Arc<dyn PeerSession>,
        config: ListenerConfig,
    ) -> Arc<Self> {
        let client_id = client_id.into();
        let (events_tx, events_rx) = mpsc::channel(config.event_channel_capacity.max(1));

        let listener = Arc::new(Self {
            client_id: client_id.clone(),
            session: Arc::clone(&session),
            config,
            local_tracks: RwLock::new(Vec::new()),
            senders: Mutex::new(HashMap::new()),
            events_tx: parking_lot::Mutex::new(Some(events_tx)),
            events_rx: Arc::new(Mutex::new(events_rx)),
            cancel: CancellationToken::new(),
        });

        debug!(client_id = %client_id, "registering inbound track handler");
        let handler_ref = Arc::downgrade(&listener);
        session.on_track(Box::new(move |remote, _receiver| {
            let fut: OnTrackFuture = match handler_ref.upgrade() {
                Some(listener) => Box::pin(async move { listener.handle_track(remote).await }),
                None => Box::pin(async {}),
            };
            fut
        }));

        listener
    }

    /// Channel delivering add/remove announcements for this publisher's
    /// forwarding tracks. The same channel is returned on every call.
    ///
    /// The channel is tightly bounded: the router must drain it
    /// continuously or inbound-track handling and forwarding teardown
    /// will stall behind the send. After [`close`](Self::close) the
    /// receiver yields `None` once in-flight workers have quiesced.
    #[must_use]
    pub fn events(&self) -> Arc<Mutex<mpsc::Receiver<TrackEvent>>> {
        Arc::clone(&self.events_rx)
    }

    #[must_use]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Snapshot of the forwarding tracks currently alive for this
    /// publisher. The returned list is a copy; it does not observe later
    /// arrivals.
    #[must_use]
    pub fn tracks(&self) -> Vec<Arc<dyn LocalTrack>> {
        self.local_tracks.read().clone()
    }

    /// Attach a caller-supplied track to this listener's session as a
    /// send-only stream and record its sender.
    ///
    /// Duplicate attachment of the same track is the caller's
    /// responsibility.
    pub async fn add_track(&self, track: Arc<dyn LocalTrack>) -> Result<()> {
        let track_id = TrackId::from(track.id());
        let mut senders = self.senders.lock().await;

        info!(client_id = %self.client_id, track_id = %track_id, "attaching send-only track");
        let sender = self
            .session
            .add_track(Arc::clone(&track))
            .await
            .map_err(|source| Error::AttachFailed {
                track_id: track_id.clone(),
                source,
            })?;

        senders.insert(track_id, sender);
        Ok(())
    }

    /// Detach a previously attached track. The sender mapping is removed
    /// only once the session has accepted the removal.
    pub async fn remove_track(&self, track: &dyn LocalTrack) -> Result<()> {
        let track_id = TrackId::from(track.id());
        let mut senders = self.senders.lock().await;

        info!(client_id = %self.client_id, track_id = %track_id, "detaching track");
        let sender = senders
            .get(&track_id)
            .cloned()
            .ok_or_else(|| Error::UnknownTrack {
                track_id: track_id.clone(),
            })?;

        self.session
            .remove_track(&sender)
            .await
            .map_err(|source| Error::DetachFailed {
                track_id: track_id.clone(),
                source,
            })?;

        senders.remove(&track_id);
        Ok(())
    }

    /// Tear the listener down. Idempotent; all internal tasks terminate
    /// promptly.
    pub fn close(&self) {
        self.cancel.cancel();
        if self.events_tx.lock().take().is_some() {
            info!(client_id = %self.client_id, "listener closed");
        }
    }

    /// Inbound-track handler: republish the remote track, announce it,
    /// and start its per-track workers.
    async fn handle_track(self: Arc<Self>, remote: Arc<dyn RemoteTrack>) {
        info!(
            client_id = %self.client_id,
            remote_id = %remote.id(),
            remote_label = %remote.label(),
            ssrc = remote.ssrc(),
            "inbound track"
        );

        let local = match self.republish(&remote).await {
            Ok(local) => local,
            Err(e) => {
                warn!(
                    client_id = %self.client_id,
                    remote_id = %remote.id(),
                    error = %e,
                    "failed to create forwarding track, abandoning remote track"
                );
                return;
            }
        };

        self.local_tracks.write().push(Arc::clone(&local));

        let events_tx = self.events_tx.lock().clone();
        if let Some(tx) = &events_tx {
            send_event(
                &self.client_id,
                &self.cancel,
                tx,
                TrackEvent {
                    client_id: self.client_id.clone(),
                    track: Arc::clone(&local),
                    kind: TrackEventKind::Add,
                },
            )
            .await;
        }

        // Both per-track workers hang off one child token: listener close
        // cancels it, and the forwarding task cancels it on exit to stop
        // the PLI timer.
        let track_token = self.cancel.child_token();
        self.spawn_pli_task(remote.ssrc(), local.id(), track_token.clone());
        self.spawn_forward_task(remote, local, events_tx, track_token);
    }

    /// Create the local forwarding track mirroring `remote`.
    async fn republish(
        &self,
        remote: &Arc<dyn RemoteTrack>,
    ) -> std::result::Result<Arc<dyn LocalTrack>, SessionError> {
        let (local_id, local_label) =
            derive_identity(&self.client_id, &remote.id(), &remote.label());

        debug!(
            client_id = %self.client_id,
            local_id = %local_id,
            local_label = %local_label,
            ssrc = remote.ssrc(),
            "creating forwarding track"
        );

        self.session
            .new_track(remote.payload_type(), remote.ssrc(), local_id, local_label)
            .await
    }

    /// Request a keyframe from the publisher immediately and then on an
    /// interval, until the per-track token is cancelled.
    fn spawn_pli_task(&self, ssrc: Ssrc, local_id: String, token: CancellationToken) {
        let session = Arc::clone(&self.session);
        let client_id = self.client_id.clone();
        let pli_interval = self.config.pli_interval;

        tokio::spawn(async move {
            // The first tick completes immediately and doubles as the
            // startup keyframe request.
            let mut ticker = tokio::time::interval(pli_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let pli = PictureLossIndication {
                            sender_ssrc: 0,
                            media_ssrc: ssrc,
                        };
                        if let Err(e) = session.write_rtcp(&[Box::new(pli)]).await {
                            warn!(
                                client_id = %client_id,
                                track_id = %local_id,
                                error = %e,
                                "PLI write failed"
                            );
                        }
                    }
                }
            }
            debug!(client_id = %client_id, track_id = %local_id, "PLI task stopped");
        });
    }

    /// Pump packets from `remote` into `local` until the read fails or
    /// the listener closes, then announce the removal.
    fn spawn_forward_task(
        &self,
        remote: Arc<dyn RemoteTrack>,
        local: Arc<dyn LocalTrack>,
        events_tx: Option<mpsc::Sender<TrackEvent>>,
        token: CancellationToken,
    ) {
        let client_id = self.client_id.clone();
        let listener_cancel = self.cancel.clone();
        let buffer_size = self.config.rtp_buffer_size;

        tokio::spawn(async move {
            forward_packets(&client_id, &remote, &local, &token, buffer_size).await;

            // Stops the PLI task for this track.
            token.cancel();

            if let Some(tx) = events_tx {
                send_event(
                    &client_id,
                    &listener_cancel,
                    &tx,
                    TrackEvent {
                        client_id: client_id.clone(),
                        track: local,
                        kind: TrackEventKind::Remove,
                    },
                )
                .await;
            }
        });
    }
}

/// Derive the forwarding track identity from the remote one. Missing
/// remote values are synthesised.
///
/// The client id prefix on the label carries publisher attribution
/// downstream; keeping the remote label tail lets the router associate
/// audio and video tracks that came from the same media stream.
fn derive_identity(
    client_id: &ClientId,
    remote_id: &str,
    remote_label: &str,
) -> (String, String) {
    let remote_id = if remote_id.is_empty() {
        new_base62_id()
    } else {
        remote_id.to_string()
    };
    let remote_label = if remote_label.is_empty() {
        new_base62_id()
    } else {
        remote_label.to_string()
    };

    let local_id = format!("sfu_{remote_id}");
    let local_label = format!("sfu_{client_id}_{remote_label}");
    (local_id, local_label)
}

/// Deliver `event`, racing the close signal. The cancellation branch is
/// polled first so nothing is emitted once close has been observed.
async fn send_event(
    client_id: &ClientId,
    cancel: &CancellationToken,
    tx: &mpsc::Sender<TrackEvent>,
    event: TrackEvent,
) {
    let kind = event.kind;
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(client_id = %client_id, kind = ?kind, "listener closed, dropping track event");
        }
        result = tx.send(event) => {
            if result.is_err() {
                debug!(client_id = %client_id, kind = ?kind, "event receiver gone, dropping track event");
            }
        }
    }
}

/// The forwarding loop: one reusable MTU-sized buffer, byte-for-byte
/// copies from the remote track to the local one.
async fn forward_packets(
    client_id: &ClientId,
    remote: &Arc<dyn RemoteTrack>,
    local: &Arc<dyn LocalTrack>,
    token: &CancellationToken,
    buffer_size: usize,
) {
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            read = remote.read(&mut buf) => match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(
                        client_id = %client_id,
                        remote_id = %remote.id(),
                        error = %e,
                        "remote track read failed"
                    );
                    break;
                }
            },
        };

        match local.write(&buf[..n]).await {
            Ok(_) => {}
            // ClosedPipe means no subscribers are attached yet.
            Err(e) if e.is_closed_pipe() => {}
            Err(e) => {
                warn!(
                    client_id = %client_id,
                    track_id = %local.id(),
                    error = %e,
                    "local track write failed"
                );
                break;
            }
        }
    }
    debug!(client_id = %client_id, track_id = %local.id(), "forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_identity_from_remote() {
        let client_id = ClientId::from("pub1");
        let (id, label) = derive_identity(&client_id, "vid", "stream-A");
        assert_eq!(id, "sfu_vid");
        assert_eq!(label, "sfu_pub1_stream-A");
    }

    #[test]
    fn synthesises_missing_identity() {
        let client_id = ClientId::from("pub1");
        let (id, label) = derive_identity(&client_id, "", "");

        let id_tail = id.strip_prefix("sfu_").expect("id prefix");
        assert!(!id_tail.is_empty());
        assert!(id_tail.chars().all(|c| c.is_ascii_alphanumeric()));

        let label_tail = label.strip_prefix("sfu_pub1_").expect("label prefix");
        assert!(!label_tail.is_empty());
        assert!(label_tail.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn synthesised_identities_are_distinct() {
        let client_id = ClientId::from("pub1");
        let (a, _) = derive_identity(&client_id, "", "");
        let (b, _) = derive_identity(&client_id, "", "");
        assert_ne!(a, b);
    }
}
