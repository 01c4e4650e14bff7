//! Authoritative timer state.
//!
//! Every read and write goes through one async mutex around the repository,
//! so listings are point-in-time consistent. `create` and a state-changing
//! `stop` hand the post-mutation snapshot to the [`TimerObserver`] while the
//! lock is still held: no reader can see the store between a mutation and
//! its broadcast.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use timesync_shared::timer::Timer;
use timesync_shared::types::{TimerId, UserId};
use timesync_store::{Repository, TimerFilter, TimerPatch, TimerRepository, UserRepository};

use crate::error::ServerError;

/// Largest duration every backend can store: SQLite integers are signed.
pub const MAX_DURATION_MS: u64 = i64::MAX as u64;

pub type SharedRepository = Arc<Mutex<Box<dyn Repository>>>;

/// Receives the full timer list after each effective mutation.
///
/// Called with the store lock held, so implementations must not block or
/// call back into the store.
pub trait TimerObserver: Send + Sync {
    fn timer_mutated(&self, snapshot: &[Timer]);
}

pub struct TimerStore {
    repo: SharedRepository,
    observer: Arc<dyn TimerObserver>,
    max_description_len: usize,
}

impl TimerStore {
    pub fn new(
        repo: SharedRepository,
        observer: Arc<dyn TimerObserver>,
        max_description_len: usize,
    ) -> Self {
        Self {
            repo,
            observer,
            max_description_len,
        }
    }

    /// Start a new timer for `owner_id`.
    pub async fn create(
        &self,
        owner_id: UserId,
        description: &str,
        duration: Option<u64>,
    ) -> Result<Timer, ServerError> {
        if description.trim().is_empty() {
            return Err(ServerError::validation("description", "must not be empty"));
        }
        if description.chars().count() > self.max_description_len {
            return Err(ServerError::validation(
                "description",
                format!("must be at most {} characters", self.max_description_len),
            ));
        }

        if duration.is_some_and(|d| d > MAX_DURATION_MS) {
            return Err(ServerError::validation(
                "duration",
                format!("must be at most {MAX_DURATION_MS} milliseconds"),
            ));
        }

        let mut repo = self.repo.lock().await;
        if !repo.user_exists(owner_id)? {
            return Err(ServerError::validation("ownerId", "unknown user"));
        }

        let timer = Timer::new(owner_id, description, duration, Utc::now());
        repo.save(&timer)?;

        let snapshot = repo.find_all(&TimerFilter::all())?;
        self.observer.timer_mutated(&snapshot);

        info!(
            timer = %timer.id,
            owner = %owner_id.short(),
            duration = ?timer.duration,
            "Timer created"
        );
        Ok(timer)
    }

    /// Stop a timer. Stopping an already stopped timer returns it unchanged
    /// and does not notify the observer.
    pub async fn stop(&self, id: TimerId) -> Result<Timer, ServerError> {
        let mut repo = self.repo.lock().await;
        let current = repo
            .find_by_id(id)?
            .ok_or_else(|| ServerError::NotFound("Timer".into()))?;

        if !current.is_active {
            debug!(timer = %id, "Stop on inactive timer, nothing to do");
            return Ok(current);
        }

        let stopped = repo
            .update_by_id(id, &TimerPatch::stopped(Utc::now()))?
            .ok_or_else(|| ServerError::NotFound("Timer".into()))?;

        let snapshot = repo.find_all(&TimerFilter::all())?;
        self.observer.timer_mutated(&snapshot);

        info!(timer = %id, "Timer stopped");
        Ok(stopped)
    }

    #[allow(dead_code)]
    pub async fn get(&self, id: TimerId) -> Result<Timer, ServerError> {
        self.repo
            .lock()
            .await
            .find_by_id(id)?
            .ok_or_else(|| ServerError::NotFound("Timer".into()))
    }

    pub async fn list(&self, filter: TimerFilter) -> Result<Vec<Timer>, ServerError> {
        Ok(self.repo.lock().await.find_all(&filter)?)
    }

    #[allow(dead_code)]
    pub async fn list_all(&self) -> Result<Vec<Timer>, ServerError> {
        self.list(TimerFilter::all()).await
    }

    #[allow(dead_code)]
    pub async fn list_active(&self) -> Result<Vec<Timer>, ServerError> {
        self.list(TimerFilter::active()).await
    }

    #[allow(dead_code)]
    pub async fn list_by_owner(&self, owner_id: UserId) -> Result<Vec<Timer>, ServerError> {
        self.list(TimerFilter::owned_by(owner_id)).await
    }

    /// Run `deliver` on a listing without releasing the store lock, so
    /// whatever it enqueues is ordered against mutation broadcasts.
    pub async fn read_with<R>(
        &self,
        filter: TimerFilter,
        deliver: impl FnOnce(&[Timer]) -> R,
    ) -> Result<R, ServerError> {
        let repo = self.repo.lock().await;
        let timers = repo.find_all(&filter)?;
        Ok(deliver(&timers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use timesync_store::{MemoryStore, UserRecord, UserRepository};

    /// Records every snapshot it is handed.
    #[derive(Default)]
    struct Recorder {
        snapshots: StdMutex<Vec<Vec<Timer>>>,
    }

    impl TimerObserver for Recorder {
        fn timer_mutated(&self, snapshot: &[Timer]) {
            self.snapshots.lock().unwrap().push(snapshot.to_vec());
        }
    }

    fn store_with_user() -> (TimerStore, Arc<Recorder>, UserId) {
        let mut backend = MemoryStore::new();
        let owner = UserId::new();
        backend
            .insert_user(&UserRecord {
                id: owner,
                username: "u1".into(),
                password_hash: "x".into(),
                created_at: Utc::now(),
            })
            .unwrap();

        let repo: SharedRepository = Arc::new(Mutex::new(Box::new(backend) as Box<dyn Repository>));
        let recorder = Arc::new(Recorder::default());
        let store = TimerStore::new(repo, recorder.clone(), 256);
        (store, recorder, owner)
    }

    #[tokio::test]
    async fn test_create_sets_initial_state() {
        let (store, _, owner) = store_with_user();
        let before = Utc::now();
        let timer = store.create(owner, "brew coffee", Some(300_000)).await.unwrap();

        assert!(timer.is_active);
        assert_eq!(timer.duration, Some(300_000));
        assert!(timer.started_at >= before && timer.started_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_create_then_list_by_owner() {
        let (store, _, owner) = store_with_user();
        let timer = store.create(owner, "brew coffee", None).await.unwrap();

        let mine = store.list_by_owner(owner).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, timer.id);
        assert_eq!(mine[0].description, "brew coffee");
        assert_eq!(mine[0].owner_id, owner);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let (store, recorder, owner) = store_with_user();

        let err = store.create(owner, "   ", None).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { field: "description", .. }));

        let long = "x".repeat(257);
        let err = store.create(owner, &long, None).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { field: "description", .. }));

        let err = store.create(owner, "x", Some(u64::MAX)).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { field: "duration", .. }));

        let err = store.create(UserId::new(), "x", None).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation { field: "ownerId", .. }));

        assert!(recorder.snapshots.lock().unwrap().is_empty());
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_notifies_once() {
        let (store, recorder, owner) = store_with_user();
        let timer = store.create(owner, "x", None).await.unwrap();

        let first = store.stop(timer.id).await.unwrap();
        let second = store.stop(timer.id).await.unwrap();
        assert!(!first.is_active);
        assert!(!second.is_active);
        assert_eq!(first.ended_at, second.ended_at);

        // One snapshot for create, one for the effective stop.
        let snapshots = recorder.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        assert!(!snapshots[1][0].is_active);
    }

    #[tokio::test]
    async fn test_stop_unknown_timer() {
        let (store, _, _) = store_with_user();
        let err = store.stop(TimerId::new()).await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_snapshot_reflects_mutation() {
        let (store, recorder, owner) = store_with_user();
        let a = store.create(owner, "a", None).await.unwrap();
        store.create(owner, "b", None).await.unwrap();

        {
            let snapshots = recorder.snapshots.lock().unwrap();
            assert_eq!(snapshots[0].len(), 1);
            assert_eq!(snapshots[1].len(), 2);
        }

        store.stop(a.id).await.unwrap();
        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].description, "b");
        assert!(!store.get(a.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_read_with_sees_consistent_listing() {
        let (store, _, owner) = store_with_user();
        store.create(owner, "a", None).await.unwrap();
        let count = store
            .read_with(TimerFilter::active(), |timers| timers.len())
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
