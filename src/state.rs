use std::sync::Arc;
use std::time::Duration;

use crate::admins::LocationAdminDirectory;
use crate::hierarchy::BusinessHierarchy;
use crate::promotions::PromotionManager;
use crate::registrations::RegistrationStore;
use crate::store::{MemoryStore, Store};
use crate::workflow::ReviewWorkflow;

/// Engines shared by every request handler. All of them sit on the same store.
#[derive(Clone)]
pub struct AppState {
    pub registrations: RegistrationStore,
    pub reviews: ReviewWorkflow,
    pub hierarchy: BusinessHierarchy,
    pub promotions: PromotionManager,
    pub admins: LocationAdminDirectory,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, deadline: Duration) -> Self {
        Self {
            registrations: RegistrationStore::new(store.clone(), deadline),
            reviews: ReviewWorkflow::new(store.clone(), deadline),
            hierarchy: BusinessHierarchy::new(store.clone(), deadline),
            promotions: PromotionManager::new(store.clone(), deadline),
            admins: LocationAdminDirectory::new(store, deadline),
        }
    }

    pub fn in_memory(deadline: Duration) -> Self {
        Self::new(Arc::new(MemoryStore::new()), deadline)
    }
}
