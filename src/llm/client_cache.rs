//! LM client instances cached by `(api_key, base_url)` — one shared client
//! per endpoint (§5). Grounded in the teacher's `SessionRegistry`
//! double-checked-locking `get_or_create` (`orchestrator/client.rs`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::backend_reqwest::ReqwestLmBackend;
use super::LmBackend;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    api_key: String,
    base_url: String,
}

#[derive(Default)]
pub struct LmClientCache {
    clients: RwLock<HashMap<ClientKey, Arc<dyn LmBackend>>>,
}

impl LmClientCache {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, api_key: &str, base_url: &str) -> Arc<dyn LmBackend> {
        let key = ClientKey {
            api_key: api_key.to_string(),
            base_url: base_url.to_string(),
        };

        if let Some(existing) = self.clients.read().unwrap().get(&key) {
            return Arc::clone(existing);
        }

        let mut clients = self.clients.write().unwrap();
        // Double-checked: another caller may have created it while we
        // waited for the write lock.
        if let Some(existing) = clients.get(&key) {
            return Arc::clone(existing);
        }
        let client: Arc<dyn LmBackend> =
            Arc::new(ReqwestLmBackend::new(api_key.to_string(), base_url.to_string()));
        clients.insert(key, Arc::clone(&client));
        client
    }

    pub fn len(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
