//! Roomcast SFU per-publisher track listener
//!
//! The server side of a group video/chat room receives one WebRTC media
//! session per participant. This crate implements the listener that
//! owns a single publisher's session: it republishes every inbound
//! media track as a locally-owned forwarding track, pumps RTP packets
//! into it, keeps the publisher producing keyframes, and announces
//! track add/remove events to the routing layer that fans media out to
//! the other participants.
//!
//! ## Architecture
//!
//! - **`TrackListener`**: one per connected publisher; owns the
//!   per-track forwarding and PLI tasks and the event channel
//! - **`PeerSession`** (trait): the underlying WebRTC session; the five
//!   operations the listener needs, mockable for tests
//! - **`TrackEvent`**: add/remove announcement consumed by the router
//!
//! ## Usage
//!
//! ```rust,ignore
//! use roomcast_sfu::{ListenerConfig, TrackListener};
//!
//! let listener = TrackListener::new("client-a", session, ListenerConfig::default());
//! let events = listener.events();
//! while let Some(event) = events.lock().await.recv().await {
//!     router.handle(event);
//! }
//! ```

mod config;
mod error;
mod event;
mod ids;
mod listener;
pub mod logging;
pub mod mock;
pub mod session;
mod types;

pub use config::{ListenerConfig, LoggingConfig};
pub use error::{Error, Result, SessionError};
pub use event::{TrackEvent, TrackEventKind};
pub use listener::TrackListener;
pub use session::{
    LocalTrack, OnTrackFuture, OnTrackHandler, PeerSession, RemoteTrack, RtpReceiver, RtpSender,
};
pub use types::{ClientId, PayloadType, Ssrc, TrackId};
