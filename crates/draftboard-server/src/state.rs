use std::sync::Arc;

use draftboard_core::ids::IdGenerator;

use crate::config::ServerConfig;
use crate::directory::HubDirectory;
use crate::hub::HubOptions;
use crate::store::GameStore;

pub type SharedStore = Arc<dyn GameStore>;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub directory: Arc<HubDirectory>,
    pub ids: Arc<IdGenerator>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: SharedStore) -> Self {
        Self::with_ids(config, store, Arc::new(IdGenerator::from_os_rng()))
    }

    /// Build state around a caller-supplied id source, e.g. a seeded one.
    pub fn with_ids(config: ServerConfig, store: SharedStore, ids: Arc<IdGenerator>) -> Self {
        let options = HubOptions {
            mailbox_capacity: config.limits.hub_mailbox_capacity,
            persist: config.persist.clone(),
        };
        Self {
            directory: HubDirectory::new(Arc::clone(&store), options),
            store,
            ids,
            config: Arc::new(config),
        }
    }
}
