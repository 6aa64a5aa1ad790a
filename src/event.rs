//! Track lifecycle events consumed by the router

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::session::LocalTrack;
use crate::types::ClientId;

/// Whether a forwarding track is beginning or ending its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackEventKind {
    Add,
    Remove,
}

/// Announcement that a forwarding track owned by `client_id` became
/// available or went away. The router subscribes other peers' sessions
/// to the track on `Add` and detaches them on `Remove`.
#[derive(Clone)]
pub struct TrackEvent {
    pub client_id: ClientId,
    pub track: Arc<dyn LocalTrack>,
    pub kind: TrackEventKind,
}

impl fmt::Debug for TrackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackEvent")
            .field("client_id", &self.client_id)
            .field("track", &self.track.id())
            .field("kind", &self.kind)
            .finish()
    }
}
