use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::Credential;
use crate::error::Result;

const TOKEN_KEY: &str = "token";
const LOCK_RETRIES: u32 = 150;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Durable home of the current credential. Only one credential is stored at a time.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Result<Option<Credential>>;
    fn set(&self, credential: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Keeps the credential in a sled tree under a single key so it survives restarts.
///
/// sled locks its files for as long as a `Db` is open, so the database is
/// opened per operation and closed again. Several console processes can
/// then share one store, e.g. a long-running `logs` next to `start`/`stop`.
pub struct SledTokenStore {
    path: PathBuf,
    /// Serializes this process's own opens.
    guard: Mutex<()>,
}

impl SledTokenStore {
    pub fn open(path: &Path) -> Result<Self> {
        info!("Using token store at {}", path.display());
        let store = Self {
            path: path.to_path_buf(),
            guard: Mutex::new(()),
        };
        // surface a bad path now instead of on first use
        store.with_db(|_| Ok(()))?;
        Ok(store)
    }

    fn with_db<T>(&self, op: impl FnOnce(&sled::Db) -> Result<T>) -> Result<T> {
        let _guard = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let db = self.open_db()?;
        let result = op(&db);
        drop(db);
        result
    }

    fn open_db(&self) -> Result<sled::Db> {
        let mut attempt = 0;
        loop {
            // set/clear flush on their own
            let opened = sled::Config::new()
                .path(&self.path)
                .flush_every_ms(None)
                .open();
            match opened {
                Ok(db) => return Ok(db),
                Err(sled::Error::Io(e)) if e.kind() == ErrorKind::WouldBlock && attempt < LOCK_RETRIES => {
                    attempt += 1;
                    debug!("Token store locked by another process, retry {}", attempt);
                    thread::sleep(LOCK_RETRY_DELAY);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl TokenStore for SledTokenStore {
    fn get(&self) -> Result<Option<Credential>> {
        let raw = self.with_db(|db| Ok(db.get(TOKEN_KEY)?))?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        match String::from_utf8(raw.to_vec()) {
            Ok(token) if !token.is_empty() => Ok(Some(Credential::new(token))),
            Ok(_) => Ok(None),
            Err(_) => {
                warn!("Stored token is not valid UTF-8, ignoring it");
                Ok(None)
            }
        }
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        self.with_db(|db| {
            db.insert(TOKEN_KEY, credential.as_str().as_bytes())?;
            db.flush()?;
            Ok(())
        })?;
        debug!("Credential persisted: {:?}", credential);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.with_db(|db| {
            db.remove(TOKEN_KEY)?;
            db.flush()?;
            Ok(())
        })?;
        debug!("Credential removed from token store");
        Ok(())
    }
}

/// Process-local store for embedders that must not touch disk.
#[derive(Default)]
pub struct MemoryTokenStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: RwLock::new(Some(credential)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Result<Option<Credential>> {
        Ok(self
            .slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn set(&self, credential: &Credential) -> Result<()> {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        Ok(())
    }
}
