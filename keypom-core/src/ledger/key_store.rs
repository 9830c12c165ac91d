use std::{collections::HashMap, sync::Mutex};

use crate::{error::KeypomError, keys::KeyPair, primitives::AccountId, Network};

use super::KeyStore;

/// A process-local [`KeyStore`]. Keys are lost when it is dropped.
#[derive(Debug, Default)]
pub struct InMemoryKeyStore {
    keys: Mutex<HashMap<(Network, AccountId), KeyPair>>,
}

impl InMemoryKeyStore {
    /// An empty key store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(Network, AccountId), KeyPair>>, KeypomError>
    {
        self.keys.lock().map_err(|_| KeypomError::InvalidKey {
            reason: "key store lock poisoned".to_string(),
        })
    }
}

impl KeyStore for InMemoryKeyStore {
    fn set_key(
        &self,
        network: Network,
        account_id: &AccountId,
        key_pair: KeyPair,
    ) -> Result<(), KeypomError> {
        self.lock()?.insert((network, account_id.clone()), key_pair);
        Ok(())
    }

    fn get_key(
        &self,
        network: Network,
        account_id: &AccountId,
    ) -> Result<Option<KeyPair>, KeypomError> {
        Ok(self.lock()?.get(&(network, account_id.clone())).cloned())
    }

    fn remove_key(&self, network: Network, account_id: &AccountId) -> Result<(), KeypomError> {
        self.lock()?.remove(&(network, account_id.clone()));
        Ok(())
    }
}
