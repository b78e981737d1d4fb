//! Session manager: id generation, in-memory and file-backed stores, and
//! a background reaper. Guarded by the crate's own three-state mutex
//! rather than a `std`/`tokio` lock — the same choice the connection
//! pool and rate limiter make for state that is only ever touched in
//! short, non-blocking critical sections.

use crate::config::SessionConfig;
use crate::cookie::SetCookie;
use crate::errors::SessionError;
use crate::sync::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One session's data plus its bookkeeping timestamps, stored as epoch
/// seconds so it serializes as plain JSON numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub data: HashMap<String, String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Session {
    fn new(id: String) -> Self {
        let now = now_secs();
        Self {
            id,
            data: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = now_secs();
    }

    fn is_expired(&self, max_age: Duration, now: u64) -> bool {
        now.saturating_sub(self.updated_at) >= max_age.as_secs()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 32 cryptographically random bytes rendered as 64 lowercase hex chars.
fn generate_session_id() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

enum Backing {
    InMemory {
        sessions: Mutex<HashMap<String, Session>>,
    },
    FileBacked {
        dir: PathBuf,
        cache: Mutex<HashMap<String, Session>>,
    },
}

/// Owns the session store and cookie configuration. Cloned cheaply
/// (`Arc` inside) so the connection loop and the reaper task share one
/// instance.
#[derive(Clone)]
pub struct SessionManager {
    backing: Arc<Backing>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        let backing = match &config.file_dir {
            Some(dir) => Backing::FileBacked {
                dir: dir.clone(),
                cache: Mutex::new(HashMap::new()),
            },
            None => Backing::InMemory {
                sessions: Mutex::new(HashMap::new()),
            },
        };
        Self {
            backing: Arc::new(backing),
            config,
        }
    }

    /// Creates a new, empty session and returns it plus the `Set-Cookie`
    /// the caller must attach to the response.
    pub fn create(&self) -> Result<(Session, SetCookie), SessionError> {
        let session = Session::new(generate_session_id());
        self.persist(&session)?;
        let cookie = self.issuing_cookie(&session.id);
        Ok((session, cookie))
    }

    pub fn get(&self, id: &str) -> Result<Session, SessionError> {
        match self.backing.as_ref() {
            Backing::InMemory { sessions } => sessions
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| SessionError::NotFound(id.to_string())),
            Backing::FileBacked { dir, cache } => {
                if let Some(session) = cache.lock().get(id).cloned() {
                    return Ok(session);
                }
                let path = dir.join(format!("{id}.json"));
                let bytes = std::fs::read(&path).map_err(|_| SessionError::NotFound(id.to_string()))?;
                let session: Session = serde_json::from_slice(&bytes)?;
                cache.lock().insert(id.to_string(), session.clone());
                Ok(session)
            }
        }
    }

    pub fn set_value(&self, id: &str, key: &str, value: &str) -> Result<(), SessionError> {
        let mut session = self.get(id)?;
        session.data.insert(key.to_string(), value.to_string());
        session.touch();
        self.persist(&session)
    }

    pub fn destroy(&self, id: &str) -> Result<(), SessionError> {
        match self.backing.as_ref() {
            Backing::InMemory { sessions } => {
                sessions.lock().remove(id);
            }
            Backing::FileBacked { dir, cache } => {
                cache.lock().remove(id);
                let path = dir.join(format!("{id}.json"));
                match std::fs::remove_file(path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(SessionError::Io(err)),
                }
            }
        }
        Ok(())
    }

    fn persist(&self, session: &Session) -> Result<(), SessionError> {
        match self.backing.as_ref() {
            Backing::InMemory { sessions } => {
                sessions.lock().insert(session.id.clone(), session.clone());
            }
            Backing::FileBacked { dir, cache } => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}.json", session.id));
                let bytes = serde_json::to_vec(session)?;
                std::fs::write(path, bytes)?;
                cache.lock().insert(session.id.clone(), session.clone());
            }
        }
        Ok(())
    }

    fn issuing_cookie(&self, id: &str) -> SetCookie {
        SetCookie {
            name: self.config.cookie_name.clone(),
            value: id.to_string(),
            max_age: Some(self.config.max_age.as_secs()),
            secure: self.config.secure,
            http_only: self.config.http_only,
            same_site: Some(self.config.same_site),
            path: "/",
        }
    }

    /// Removes every session whose `updated_at` has aged past `max_age`.
    /// Called by `spawn_reaper`'s loop, and directly by tests.
    pub fn reap_expired(&self) {
        let now = now_secs();
        let max_age = self.config.max_age;
        match self.backing.as_ref() {
            Backing::InMemory { sessions } => {
                sessions.lock().retain(|_, s| !s.is_expired(max_age, now));
            }
            Backing::FileBacked { dir, cache } => {
                cache.lock().retain(|_, s| !s.is_expired(max_age, now));
                let Ok(entries) = std::fs::read_dir(dir) else {
                    return;
                };
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Ok(bytes) = std::fs::read(&path) {
                        if let Ok(session) = serde_json::from_slice::<Session>(&bytes) {
                            if session.is_expired(max_age, now) {
                                let _ = std::fs::remove_file(&path);
                            }
                        }
                    }
                }
            }
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.config.cookie_name
    }

    /// Spawns the background reaper task, waking every
    /// `config.cleanup_interval`. Returns the task handle so the server
    /// can abort it on shutdown.
    pub fn spawn_reaper(&self) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                manager.reap_expired();
            }
        })
    }
}
