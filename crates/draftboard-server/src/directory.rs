use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::hub::{Hub, HubHandle, HubOptions};
use crate::store::GameStore;

struct Entry {
    handle: HubHandle,
    /// Distinguishes successive hubs for the same game, so a late cleanup
    /// from a terminated hub never removes its replacement.
    generation: u64,
}

/// Process-wide map from game id to its live hub. At most one hub per game
/// is live at a time; hubs are created on first use and remove themselves
/// when their last connection leaves.
pub struct HubDirectory {
    hubs: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    store: Arc<dyn GameStore>,
    options: HubOptions,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl HubDirectory {
    pub fn new(store: Arc<dyn GameStore>, options: HubOptions) -> Arc<Self> {
        Arc::new(Self {
            hubs: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            store,
            options,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    fn hubs(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live hub for `game_id`, starting one if there is none.
    /// An entry whose hub already terminated is replaced.
    pub fn get_or_create(self: &Arc<Self>, game_id: &str) -> HubHandle {
        let mut hubs = self.hubs();
        if let Some(entry) = hubs.get(game_id)
            && !entry.handle.is_closed()
        {
            return entry.handle.clone();
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let directory = Arc::downgrade(self);
        let owned_id = game_id.to_string();
        let (hub, handle) = Hub::new(
            game_id,
            Arc::clone(&self.store),
            self.options.clone(),
            self.shutdown.child_token(),
            Box::new(move || remove_entry(&directory, &owned_id, generation)),
        );
        self.tracker.spawn(hub.run());
        hubs.insert(
            game_id.to_string(),
            Entry {
                handle: handle.clone(),
                generation,
            },
        );
        tracing::info!(game_id, generation, "Started hub");
        handle
    }

    /// The live hub for `game_id`, if one is running.
    pub fn get(&self, game_id: &str) -> Option<HubHandle> {
        self.hubs()
            .get(game_id)
            .filter(|entry| !entry.handle.is_closed())
            .map(|entry| entry.handle.clone())
    }

    /// Remove the entry for `game_id` only if it still belongs to
    /// `generation`.
    fn remove(&self, game_id: &str, generation: u64) {
        let mut hubs = self.hubs();
        if hubs.get(game_id).is_some_and(|e| e.generation == generation) {
            hubs.remove(game_id);
            tracing::info!(game_id, generation, "Removed hub");
        }
    }

    pub fn len(&self) -> usize {
        self.hubs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total registered connections across all hubs.
    pub fn connection_count(&self) -> usize {
        self.hubs()
            .values()
            .map(|entry| entry.handle.connection_count())
            .sum()
    }

    /// Token cancelled when the server begins shutting down. Connection
    /// tasks derive child tokens from it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Tracker for hub and connection tasks.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Stop every hub and connection task, then wait for them to finish.
    pub async fn shutdown(&self) {
        tracing::info!(hubs = self.len(), "Shutting down hubs");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn remove_entry(directory: &Weak<HubDirectory>, game_id: &str, generation: u64) {
    if let Some(directory) = directory.upgrade() {
        directory.remove(game_id, generation);
    }
}
