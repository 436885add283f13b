use std::collections::HashMap;
use std::sync::Mutex;

pub mod vault;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SecretStoreError {
    #[error("cannot reach secret store: {raw_error_message}")]
    Unreachable { raw_error_message: String },

    #[error("cannot read secret `{name}`: {raw_error_message}")]
    CannotRead { name: String, raw_error_message: String },

    #[error("cannot write secret `{name}`: {raw_error_message}")]
    CannotWrite { name: String, raw_error_message: String },
}

/// String values keyed by opaque name. Credentials objects are serialized
/// JSON; the caller owns the format.
pub trait SecretStore: Send + Sync {
    fn get_secret(&self, name: &str) -> Result<Option<String>, SecretStoreError>;
    fn save_secret(&self, name: &str, value: &str) -> Result<(), SecretStoreError>;
    fn delete_secret(&self, name: &str) -> Result<(), SecretStoreError>;
}

#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn with(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        InMemorySecretStore {
            secrets: Mutex::new(entries.into_iter().collect()),
        }
    }
}

impl SecretStore for InMemorySecretStore {
    fn get_secret(&self, name: &str) -> Result<Option<String>, SecretStoreError> {
        Ok(self.secrets.lock().unwrap().get(name).cloned())
    }

    fn save_secret(&self, name: &str, value: &str) -> Result<(), SecretStoreError> {
        self.secrets.lock().unwrap().insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete_secret(&self, name: &str) -> Result<(), SecretStoreError> {
        self.secrets.lock().unwrap().remove(name);
        Ok(())
    }
}
