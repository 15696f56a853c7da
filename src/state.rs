use std::sync::Arc;

use tokio::sync::watch;

use crate::{lifecycle::StoreState, users::repo::UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub env: Arc<str>,
    pub store_status: watch::Receiver<StoreState>,
    pub users: Arc<dyn UserRepository>,
}

impl AppState {
    pub fn new(
        env: &str,
        store_status: watch::Receiver<StoreState>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            env: Arc::from(env),
            store_status,
            users,
        }
    }

    #[cfg(test)]
    pub fn fake(store_state: StoreState) -> Self {
        use crate::users::memory::MemoryUserRepository;

        let (_tx, rx) = watch::channel(store_state);
        Self::new("test", rx, Arc::new(MemoryUserRepository::new()))
    }
}
