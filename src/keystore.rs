//! AI credential storage using the OS credential store.
//!
//! The vision API key never touches the config file or the backend. On
//! Windows it lives in the Credential Manager, on macOS in the Keychain and
//! on Linux in the Secret Service (all via the `keyring` crate).

use std::sync::Mutex;

use keyring::Entry;
use tracing::{info, warn};
use zeroize::Zeroizing;

const SERVICE_NAME: &str = "livedrop-desk";
const KEY_AI_API_KEY: &str = "ai_api_key";

pub type SecretKey = Zeroizing<String>;

pub trait KeyStore: Send + Sync {
    /// The saved key, or `None` when nothing (or only whitespace) is stored.
    fn load(&self) -> Option<SecretKey>;
    fn save(&self, key: &str) -> Result<(), String>;
    /// Succeeds when nothing was stored.
    fn clear(&self) -> Result<(), String>;

    fn has_key(&self) -> bool {
        self.load().is_some()
    }
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KeyringKeyStore {
    service: String,
}

impl Default for KeyringKeyStore {
    fn default() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }
}

impl KeyringKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self) -> Result<Entry, String> {
        Entry::new(&self.service, KEY_AI_API_KEY).map_err(|e| e.to_string())
    }
}

impl KeyStore for KeyringKeyStore {
    fn load(&self) -> Option<SecretKey> {
        let entry = match self.entry() {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "keyring: failed to create entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(pw) => normalize(&pw),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(error = %e, "keyring: failed to read AI key");
                None
            }
        }
    }

    fn save(&self, key: &str) -> Result<(), String> {
        let Some(key) = normalize(key) else {
            return Err("API key cannot be empty".to_string());
        };
        self.entry()?
            .set_password(&key)
            .map_err(|e| e.to_string())?;
        info!("AI key saved to OS keyring");
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                info!("AI key cleared from OS keyring");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory (tests and headless runs)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryKeyStore {
    key: Mutex<Option<SecretKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(key: &str) -> Self {
        Self {
            key: Mutex::new(normalize(key)),
        }
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> Option<SecretKey> {
        self.key.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn save(&self, key: &str) -> Result<(), String> {
        let key = normalize(key).ok_or_else(|| "API key cannot be empty".to_string())?;
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = Some(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), String> {
        *self.key.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

fn normalize(raw: &str) -> Option<SecretKey> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| Zeroizing::new(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryKeyStore::new();
        assert!(!store.has_key());
        store.save("  sk-ant-test  ").unwrap();
        assert_eq!(store.load().as_deref().map(String::as_str), Some("sk-ant-test"));
        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_blank_key_rejected() {
        let store = MemoryKeyStore::with_key("sk-ant-old");
        assert!(store.save("   ").is_err());
        assert!(store.has_key());
    }
}
