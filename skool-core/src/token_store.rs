use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use crate::{Error, Result};

/// Storage key of the rotating login credential
pub const LOGIN_TOKEN_KEY: &str = "login_token";
/// Storage key of the session credential
pub const SESSION_TOKEN_KEY: &str = "session_token";

/// How long a slot's value outlives the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Survives application restarts
    Durable,
    /// Lives as long as the current session (process)
    Session,
}

/// A single named secret with synchronous get/set.
pub trait TokenSlot: Send + Sync {
    fn retention(&self) -> Retention;

    fn get(&self) -> Option<String>;

    /// Store a value; `None` clears the slot.
    fn set(&self, value: Option<&str>) -> Result<()>;

    fn clear(&self) -> Result<()> {
        self.set(None)
    }
}

/// In-memory slot, gone when the process exits
#[derive(Debug)]
pub struct MemorySlot {
    retention: Retention,
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self {
            retention: Retention::Session,
            value: Mutex::new(None),
        }
    }

    /// A memory slot that pretends to be durable, for tests and embedding.
    pub fn durable() -> Self {
        Self {
            retention: Retention::Durable,
            value: Mutex::new(None),
        }
    }

    pub fn with_value(self, value: impl Into<String>) -> Self {
        *self.lock() = Some(value.into());
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.value
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemorySlot {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSlot for MemorySlot {
    fn retention(&self) -> Retention {
        self.retention
    }

    fn get(&self) -> Option<String> {
        self.lock().clone()
    }

    fn set(&self, value: Option<&str>) -> Result<()> {
        *self.lock() = value.map(str::to_string);
        Ok(())
    }
}

/// Durable slot backed by one file
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Slot file `<dir>/<key>`.
    pub fn in_dir(dir: &Path, key: &str) -> Self {
        Self::new(dir.join(key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create token directory: {}", e))
            })?;
        }

        // Write then rename so a crash never leaves a half-written token.
        let tmp = self.path.with_extension("tmp");
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::Storage(format!(
                    "Failed to remove stale token file: {}",
                    e
                )));
            }
        }

        let mut file = open_private(&tmp)
            .map_err(|e| Error::Storage(format!("Failed to create token file: {}", e)))?;
        file.write_all(value.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| Error::Storage(format!("Failed to write token file: {}", e)))?;
        drop(file);

        fs::rename(&tmp, &self.path)
            .map_err(|e| Error::Storage(format!("Failed to replace token file: {}", e)))
    }

    fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Storage(format!("Failed to delete token file: {}", e))),
        }
    }
}

/// Create a file readable only by the owner from the start.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

impl TokenSlot for FileSlot {
    fn retention(&self) -> Retention {
        Retention::Durable
    }

    fn get(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let token = content.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read token file: {}", e);
                None
            }
        }
    }

    fn set(&self, value: Option<&str>) -> Result<()> {
        match value {
            Some(token) if !token.is_empty() => self.write(token),
            _ => self.remove(),
        }
    }
}

/// The two credential slots, each in its own retention domain
#[derive(Clone)]
pub struct TokenStore {
    login: Arc<dyn TokenSlot>,
    session: Arc<dyn TokenSlot>,
}

impl TokenStore {
    pub fn new(login: Arc<dyn TokenSlot>, session: Arc<dyn TokenSlot>) -> Self {
        if login.retention() != Retention::Durable {
            tracing::warn!("Login token slot is not durable, renewal will not survive restarts");
        }
        if session.retention() != Retention::Session {
            tracing::warn!("Session token slot outlives the session");
        }
        Self { login, session }
    }

    /// Login token on disk under `dir`, session token in memory.
    pub fn open(dir: &Path) -> Self {
        Self::new(
            Arc::new(FileSlot::in_dir(dir, LOGIN_TOKEN_KEY)),
            Arc::new(MemorySlot::new()),
        )
    }

    /// Both slots in memory.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemorySlot::durable()),
            Arc::new(MemorySlot::new()),
        )
    }

    pub fn login_token(&self) -> Option<String> {
        self.login.get()
    }

    pub fn set_login_token(&self, value: Option<&str>) -> Result<()> {
        self.login.set(value)
    }

    pub fn session_token(&self) -> Option<String> {
        self.session.get()
    }

    pub fn set_session_token(&self, value: Option<&str>) -> Result<()> {
        self.session.set(value)
    }

    /// Clear both slots, login token first so nothing can renew in between.
    ///
    /// Both slots are always attempted; the first failure is returned.
    pub fn clear(&self) -> Result<()> {
        let login = self.login.clear();
        let session = self.session.clear();
        login.and(session)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("has_login_token", &self.login.get().is_some())
            .field("has_session_token", &self.session.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_slot_set_none_clears() {
        let slot = MemorySlot::new().with_value("abc");
        assert_eq!(slot.get().as_deref(), Some("abc"));
        slot.set(None).unwrap();
        assert_eq!(slot.get(), None);
        assert_eq!(slot.retention(), Retention::Session);
    }

    #[test]
    fn file_slot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), LOGIN_TOKEN_KEY);
        assert_eq!(slot.get(), None);

        slot.set(Some("rotating-1")).unwrap();
        let reopened = FileSlot::in_dir(dir.path(), LOGIN_TOKEN_KEY);
        assert_eq!(reopened.get().as_deref(), Some("rotating-1"));

        reopened.clear().unwrap();
        assert_eq!(slot.get(), None);
        assert!(!slot.path().exists());
        // clearing twice is fine
        slot.clear().unwrap();
    }

    #[test]
    fn file_slot_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::new(dir.path().join("nested").join("deeper").join("token"));
        slot.set(Some("t")).unwrap();
        assert_eq!(slot.get().as_deref(), Some("t"));
    }

    #[cfg(unix)]
    #[test]
    fn file_slot_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), LOGIN_TOKEN_KEY);
        // a leftover temp file from an interrupted write must not leak its mode
        fs::write(slot.path().with_extension("tmp"), "stale").unwrap();
        fs::set_permissions(
            slot.path().with_extension("tmp"),
            fs::Permissions::from_mode(0o644),
        )
        .unwrap();

        slot.set(Some("secret")).unwrap();

        let mode = fs::metadata(slot.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(slot.get().as_deref(), Some("secret"));
        assert!(!slot.path().with_extension("tmp").exists());
    }

    #[test]
    fn empty_value_clears_file_slot() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), LOGIN_TOKEN_KEY);
        slot.set(Some("x")).unwrap();
        slot.set(Some("")).unwrap();
        assert_eq!(slot.get(), None);
    }

    #[test]
    fn store_keeps_slots_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::open(dir.path());
        store.set_login_token(Some("login")).unwrap();
        store.set_session_token(Some("session")).unwrap();

        // a new process sees only the durable slot
        let next_process = TokenStore::open(dir.path());
        assert_eq!(next_process.login_token().as_deref(), Some("login"));
        assert_eq!(next_process.session_token(), None);

        store.clear().unwrap();
        assert_eq!(store.login_token(), None);
        assert_eq!(store.session_token(), None);
    }
}
