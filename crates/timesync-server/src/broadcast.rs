//! Sync broadcaster.
//!
//! Turns timer listings into `all_timers` / `active_timers` envelopes and
//! pushes them through the [`ConnectionRegistry`]. Mutation snapshots fan
//! out to every authenticated connection; ticks target a single one.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use timesync_shared::progress::{compute_views, ElapsedMode, TimerView};
use timesync_shared::protocol::ServerMessage;
use timesync_shared::timer::Timer;
use timesync_shared::types::{ConnectionId, UserId};
use timesync_store::TimerFilter;

use crate::connections::{ConnectionRegistry, ConnectionState};
use crate::timers::{TimerObserver, TimerStore};

/// Which timers a connection is shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastScope {
    /// Every connection receives every user's timers.
    #[default]
    Global,
    /// A connection only receives timers owned by its identity.
    Owner,
}

impl FromStr for BroadcastScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "owner" => Ok(Self::Owner),
            other => Err(format!("unknown broadcast scope: {other}")),
        }
    }
}

pub struct SyncBroadcaster {
    registry: Arc<ConnectionRegistry>,
    scope: BroadcastScope,
    elapsed_mode: ElapsedMode,
}

impl SyncBroadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        scope: BroadcastScope,
        elapsed_mode: ElapsedMode,
    ) -> Self {
        Self {
            registry,
            scope,
            elapsed_mode,
        }
    }

    /// Views of the timers in `timers` that `viewer` may see.
    fn visible(&self, viewer: UserId, timers: &[Timer], now: DateTime<Utc>) -> Vec<TimerView> {
        match self.scope {
            BroadcastScope::Global => compute_views(timers, now, self.elapsed_mode),
            BroadcastScope::Owner => {
                let owned: Vec<Timer> = timers
                    .iter()
                    .filter(|t| t.owner_id == viewer)
                    .cloned()
                    .collect();
                compute_views(&owned, now, self.elapsed_mode)
            }
        }
    }

    /// Push an `all_timers` snapshot of `timers` to one connection.
    pub fn send_snapshot(&self, id: ConnectionId, timers: &[Timer]) -> bool {
        let views = compute_views(timers, Utc::now(), self.elapsed_mode);
        self.registry.push(id, ServerMessage::all_timers(views))
    }

    /// One tick for connection `id`.
    ///
    /// Returns `false` once the connection is gone, which ends its tick
    /// loop. A tick before authentication pushes nothing.
    pub async fn tick(&self, id: ConnectionId, store: &TimerStore) -> bool {
        let viewer = match self.registry.state(id) {
            None => return false,
            Some(ConnectionState::Connecting) => return true,
            Some(ConnectionState::Authenticated(user)) => user,
        };

        let result = store
            .read_with(TimerFilter::active(), |active| {
                let views = self.visible(viewer, active, Utc::now());
                self.registry.push(id, ServerMessage::active_timers(views))
            })
            .await;

        match result {
            Ok(open) => open,
            Err(e) => {
                warn!(conn = %id, error = %e, "Tick skipped: could not read active timers");
                true
            }
        }
    }
}

impl TimerObserver for SyncBroadcaster {
    fn timer_mutated(&self, snapshot: &[Timer]) {
        let now = Utc::now();
        let delivered = match self.scope {
            BroadcastScope::Global => {
                let views = compute_views(snapshot, now, self.elapsed_mode);
                self.registry
                    .broadcast_with(|_| ServerMessage::all_timers(views.clone()))
            }
            BroadcastScope::Owner => self.registry.broadcast_with(|viewer| {
                ServerMessage::all_timers(self.visible(viewer, snapshot, now))
            }),
        };

        debug!(
            timers = snapshot.len(),
            delivered,
            "Broadcast all_timers snapshot"
        );
    }
}
