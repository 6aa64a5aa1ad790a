//! End-to-end tests for the track listener against an in-memory session.

use std::sync::Arc;
use std::time::Duration;

use roomcast_sfu::mock::{MockLocalTrack, MockPeerSession, MockRemoteTrack};
use roomcast_sfu::{
    Error, ListenerConfig, LocalTrack, PeerSession, TrackEvent, TrackEventKind, TrackListener,
};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

const PLI_INTERVAL: Duration = Duration::from_millis(20);

fn test_config() -> ListenerConfig {
    ListenerConfig {
        pli_interval: PLI_INTERVAL,
        ..ListenerConfig::default()
    }
}

fn new_listener(client_id: &str) -> (Arc<MockPeerSession>, Arc<TrackListener>) {
    let session = Arc::new(MockPeerSession::new());
    let listener = TrackListener::new(
        client_id,
        Arc::clone(&session) as Arc<dyn PeerSession>,
        test_config(),
    );
    (session, listener)
}

/// Poll until `cond` holds, failing the test after two seconds.
async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn recv_event(events: &Arc<Mutex<mpsc::Receiver<TrackEvent>>>) -> Option<TrackEvent> {
    tokio::time::timeout(Duration::from_secs(2), async {
        events.lock().await.recv().await
    })
    .await
    .expect("timed out waiting for track event")
}

#[tokio::test]
async fn republishes_track_and_forwards_packets() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(Arc::clone(&remote) as Arc<dyn roomcast_sfu::RemoteTrack>).await;

    let events = listener.events();
    let event = recv_event(&events).await.expect("add event");
    assert_eq!(event.kind, TrackEventKind::Add);
    assert_eq!(event.client_id.as_str(), "pub1");
    assert_eq!(event.track.id(), "sfu_vid");
    assert_eq!(event.track.label(), "sfu_pub1_stream-A");
    assert_eq!(event.track.payload_type(), 96);
    assert_eq!(event.track.ssrc(), 12345);

    let local = session.created_tracks().remove(0);
    let payloads: Vec<Vec<u8>> = vec![vec![1; 200], vec![2; 500], vec![3; 1200]];
    for p in &payloads {
        remote.feed(p.clone());
    }

    wait_until("three forwarded packets", || local.written().len() == 3).await;
    assert_eq!(local.written(), payloads);

    let tracks = listener.tracks();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].id(), "sfu_vid");
}

#[tokio::test]
async fn synthesises_identity_for_anonymous_tracks() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("", "", 111, 7));
    session.dispatch_track(remote).await;

    let events = listener.events();
    let event = recv_event(&events).await.expect("add event");

    let id_tail = event.track.id();
    let id_tail = id_tail.strip_prefix("sfu_").expect("id prefix");
    assert!(!id_tail.is_empty());
    assert!(id_tail.chars().all(|c| c.is_ascii_alphanumeric()));

    let label = event.track.label();
    let label_tail = label.strip_prefix("sfu_pub1_").expect("label prefix");
    assert!(!label_tail.is_empty());
    assert!(label_tail.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn close_is_idempotent_and_ends_the_event_stream() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(remote).await;

    let events = listener.events();
    let event = recv_event(&events).await.expect("add event");
    assert_eq!(event.kind, TrackEventKind::Add);

    listener.close();
    listener.close();
    listener.close();

    // The forwarding worker may have raced close with its exit path: a
    // final Remove is acceptable, but the stream must then end.
    let mut saw_remove = false;
    loop {
        match recv_event(&events).await {
            Some(event) => {
                assert_eq!(event.kind, TrackEventKind::Remove);
                assert!(!saw_remove, "more than one remove for a single track");
                saw_remove = true;
            }
            None => break,
        }
    }
}

#[tokio::test]
async fn no_events_are_emitted_after_close() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(Arc::clone(&remote) as Arc<dyn roomcast_sfu::RemoteTrack>).await;

    let events = listener.events();
    assert_eq!(
        recv_event(&events).await.expect("add event").kind,
        TrackEventKind::Add
    );

    listener.close();
    wait_until("event stream end", || {
        matches!(events.try_lock().map(|mut rx| rx.try_recv()), Ok(Err(mpsc::error::TryRecvError::Disconnected)))
    })
    .await;

    // Ending the remote stream after close must not resurrect the channel.
    remote.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.lock().await.recv().await.is_none());
}

#[tokio::test]
async fn read_failure_stops_forwarding_and_announces_removal() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(Arc::clone(&remote) as Arc<dyn roomcast_sfu::RemoteTrack>).await;

    let events = listener.events();
    let added = recv_event(&events).await.expect("add event");
    assert_eq!(added.kind, TrackEventKind::Add);

    remote.feed(vec![9; 100]);
    remote.close();

    let removed = recv_event(&events).await.expect("remove event");
    assert_eq!(removed.kind, TrackEventKind::Remove);
    assert_eq!(removed.track.id(), added.track.id());

    // The PLI task for the dead track must stop with it.
    tokio::time::sleep(PLI_INTERVAL * 2).await;
    let count = session.rtcp_write_count();
    tokio::time::sleep(PLI_INTERVAL * 3).await;
    assert_eq!(session.rtcp_write_count(), count);
}

#[tokio::test]
async fn add_then_remove_clears_the_sender_mapping() {
    let (session, listener) = new_listener("pub1");

    let track = Arc::new(MockLocalTrack::new("t1", "label", 96, 1)) as Arc<dyn LocalTrack>;
    listener.add_track(Arc::clone(&track)).await.expect("attach");
    assert_eq!(session.attached(), vec!["t1".to_string()]);

    listener.remove_track(track.as_ref()).await.expect("detach");
    assert_eq!(session.detached(), vec!["t1".to_string()]);

    let err = listener.remove_track(track.as_ref()).await.unwrap_err();
    assert!(matches!(err, Error::UnknownTrack { .. }));
}

#[tokio::test]
async fn remove_without_add_is_rejected_without_side_effects() {
    let (session, listener) = new_listener("pub1");

    let track = Arc::new(MockLocalTrack::new("t1", "label", 96, 1));
    let err = listener.remove_track(&*track).await.unwrap_err();
    assert!(matches!(err, Error::UnknownTrack { .. }));
    assert!(session.detached().is_empty());
}

#[tokio::test]
async fn attach_failure_is_surfaced_and_leaves_listener_usable() {
    let (session, listener) = new_listener("pub1");
    session.fail_add_track(true);

    let track = Arc::new(MockLocalTrack::new("t1", "label", 96, 1)) as Arc<dyn LocalTrack>;
    let err = listener.add_track(Arc::clone(&track)).await.unwrap_err();
    assert!(matches!(err, Error::AttachFailed { .. }));

    session.fail_add_track(false);
    listener.add_track(track).await.expect("attach after recovery");
}

#[tokio::test]
async fn detach_failure_keeps_the_sender_mapping() {
    let (session, listener) = new_listener("pub1");

    let track = Arc::new(MockLocalTrack::new("t1", "label", 96, 1)) as Arc<dyn LocalTrack>;
    listener.add_track(Arc::clone(&track)).await.expect("attach");

    session.fail_remove_track(true);
    let err = listener.remove_track(track.as_ref()).await.unwrap_err();
    assert!(matches!(err, Error::DetachFailed { .. }));

    // The mapping survived the failed detach, so a retry succeeds.
    session.fail_remove_track(false);
    listener.remove_track(track.as_ref()).await.expect("detach retry");
}

#[tokio::test]
async fn keyframe_requests_follow_the_configured_cadence() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(remote).await;

    let events = listener.events();
    recv_event(&events).await.expect("add event");

    // One immediate PLI plus one per interval: expect roughly 4 over
    // 3.5 intervals, with slack for scheduling.
    tokio::time::sleep(PLI_INTERVAL * 7 / 2).await;
    let count = session.rtcp_write_count();
    assert!((2..=6).contains(&count), "unexpected PLI count {count}");
    assert!(session.rtcp_ssrcs().iter().all(|&ssrc| ssrc == 12345));
}

#[tokio::test]
async fn rtcp_failures_do_not_disturb_forwarding() {
    let (session, listener) = new_listener("pub1");
    session.fail_write_rtcp(true);

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(Arc::clone(&remote) as Arc<dyn roomcast_sfu::RemoteTrack>).await;

    let events = listener.events();
    assert_eq!(
        recv_event(&events).await.expect("add event").kind,
        TrackEventKind::Add
    );

    let local = session.created_tracks().remove(0);
    for i in 0..5u8 {
        remote.feed(vec![i; 64]);
    }
    wait_until("five forwarded packets", || local.written().len() == 5).await;
}

#[tokio::test]
async fn closed_pipe_writes_are_ignored() {
    let (session, listener) = new_listener("pub1");

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(Arc::clone(&remote) as Arc<dyn roomcast_sfu::RemoteTrack>).await;

    let events = listener.events();
    recv_event(&events).await.expect("add event");

    let local = session.created_tracks().remove(0);
    local.set_closed_pipe(true);
    remote.feed(vec![1; 64]);
    remote.feed(vec![2; 64]);

    // No subscribers yet: writes are dropped but the loop keeps going.
    tokio::time::sleep(Duration::from_millis(50)).await;
    local.set_closed_pipe(false);
    remote.feed(vec![3; 64]);

    wait_until("forwarding resumed", || local.written() == vec![vec![3; 64]]).await;
}

#[tokio::test]
async fn create_failure_abandons_the_remote_track() {
    let (session, listener) = new_listener("pub1");
    session.fail_new_track(true);

    let remote = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 12345));
    session.dispatch_track(remote).await;

    assert!(listener.tracks().is_empty());
    let events = listener.events();
    assert!(matches!(
        events.lock().await.try_recv(),
        Err(mpsc::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn two_tracks_forward_independently() {
    let (session, listener) = new_listener("pub1");

    let video = Arc::new(MockRemoteTrack::new("vid", "stream-A", 96, 1));
    let audio = Arc::new(MockRemoteTrack::new("aud", "stream-A", 111, 2));

    // Dispatch concurrently; each handler blocks on the bounded event
    // channel until the test drains it below.
    let dispatches = [Arc::clone(&video), Arc::clone(&audio)].map(|remote| {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.dispatch_track(remote).await })
    });

    let events = listener.events();
    let first = recv_event(&events).await.expect("first add");
    let second = recv_event(&events).await.expect("second add");
    assert_eq!(first.kind, TrackEventKind::Add);
    assert_eq!(second.kind, TrackEventKind::Add);

    let mut ids = vec![first.track.id(), second.track.id()];
    ids.sort();
    assert_eq!(ids, vec!["sfu_aud".to_string(), "sfu_vid".to_string()]);

    for handle in dispatches {
        handle.await.expect("dispatch task");
    }

    video.feed(vec![0xAA; 300]);
    audio.feed(vec![0xBB; 60]);

    let locals = session.created_tracks();
    let by_id = |id: &str| {
        locals
            .iter()
            .find(|t| t.id() == id)
            .cloned()
            .expect("created track")
    };
    let local_video = by_id("sfu_vid");
    let local_audio = by_id("sfu_aud");

    wait_until("both tracks forwarded", || {
        !local_video.written().is_empty() && !local_audio.written().is_empty()
    })
    .await;
    assert_eq!(local_video.written(), vec![vec![0xAA; 300]]);
    assert_eq!(local_audio.written(), vec![vec![0xBB; 60]]);

    assert_eq!(listener.tracks().len(), 2);
}

#[tokio::test]
async fn client_id_is_constant() {
    let (_session, listener) = new_listener("pub1");
    assert_eq!(listener.client_id().as_str(), "pub1");
    assert_eq!(listener.client_id().as_str(), "pub1");
}
