//! Per-request facade: headers, params, query, body, cookies, session
//! handle, state bag, and the response builder.
//!
//! The opaque `setState`/`getState` bag from spec.md §4.5 is implemented,
//! per REDESIGN FLAGS, as a typed heterogeneous map keyed by `TypeId`
//! rather than an untyped pointer cast.

use crate::config::{ReqLimits, RespLimits};
use crate::cookie::{CookieJar, SetCookie};
use crate::errors::SessionError;
use crate::http::request::RequestHead;
use crate::http::response::Response;
use crate::http::types::StatusCode;
use crate::multipart::{self, MultipartError, MultipartField};
use crate::session::{Session, SessionManager};
use std::any::{Any, TypeId};
use std::collections::HashMap;

/// Errors from the context's lazy accessors. Each leaves the
/// corresponding cache unset so a later, corrected call can retry.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Typed heterogeneous state bag, keyed by `TypeId` — the REDESIGN-FLAGS
/// replacement for the source's untyped state pointer.
#[derive(Default)]
struct StateBag {
    values: HashMap<TypeId, Box<dyn Any + Send>>,
}

impl StateBag {
    fn set<T: Any + Send>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Box::new(value));
    }

    fn get<T: Any + Send>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    fn get_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.values
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }
}

/// Everything one request/response pair needs. Created when the head
/// (and body, if any) finish parsing; destroyed once the response is
/// serialized onto the wire.
pub struct Context {
    pub request: RequestHead,
    pub response: Response,
    pub params: HashMap<String, String>,
    pub request_id: String,
    pub peer_addr: Option<String>,
    body: Vec<u8>,
    state: StateBag,
    cookie_jar: Option<CookieJar>,
    pending_set_cookies: Vec<SetCookie>,
    json_cache: Option<serde_json::Value>,
    multipart_cache: Option<Vec<MultipartField>>,
    session_manager: Option<SessionManager>,
    session: Option<Session>,
}

impl Context {
    pub(crate) fn new(
        request: RequestHead,
        body: Vec<u8>,
        params: HashMap<String, String>,
        _req_limits: &ReqLimits,
        resp_limits: &RespLimits,
    ) -> Self {
        let version = request.version;
        let keep_alive = request.keep_alive;
        Self {
            request,
            response: Response::new(resp_limits, version, keep_alive),
            params,
            request_id: generate_request_id(),
            peer_addr: None,
            body,
            state: StateBag::default(),
            cookie_jar: None,
            pending_set_cookies: Vec::new(),
            json_cache: None,
            multipart_cache: None,
            session_manager: None,
            session: None,
        }
    }

    /// Wires up session cooperation for this request. Called by the
    /// connection loop before the pipeline runs, when the server was
    /// built with a [`SessionManager`].
    pub(crate) fn attach_session_manager(&mut self, manager: SessionManager) {
        self.session_manager = Some(manager);
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn query(&self, name: &[u8]) -> Option<&[u8]> {
        self.request.url.query(name)
    }

    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.request.header(name)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.request.headers.iter()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Parses the body as JSON, caching the result on first call.
    pub fn parse_json(&mut self) -> Result<&serde_json::Value, ContextError> {
        if self.json_cache.is_none() {
            self.json_cache = Some(serde_json::from_slice(&self.body)?);
        }
        Ok(self.json_cache.as_ref().unwrap())
    }

    /// Parses `application/x-www-form-urlencoded` bodies into pairs.
    pub fn parse_form(&self) -> Vec<(String, String)> {
        crate::http::query::Query::parse::<Vec<(&[u8], &[u8])>>(&self.body, self.body.len())
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                (
                    String::from_utf8_lossy(k).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect()
    }

    /// Parses a `multipart/form-data` body against the request's
    /// `Content-Type` boundary, caching the result on first call.
    pub fn get_multipart(&mut self) -> Result<&[MultipartField], MultipartError> {
        if self.multipart_cache.is_none() {
            let content_type = self.request.header(b"content-type").unwrap_or(b"");
            self.multipart_cache = Some(multipart::parse(content_type, &self.body)?);
        }
        Ok(self.multipart_cache.as_deref().unwrap())
    }

    /// Returns the first file field (a part with a `filename`) named
    /// `field_name`, parsing the body on first call.
    pub fn get_file(&mut self, field_name: &str) -> Result<Option<&MultipartField>, MultipartError> {
        let fields = self.get_multipart()?;
        Ok(fields.iter().find(|f| f.name == field_name && f.filename.is_some()))
    }

    /// Returns every file field in the body, parsing it on first call.
    pub fn get_all_files(&mut self) -> Result<Vec<&MultipartField>, MultipartError> {
        let fields = self.get_multipart()?;
        Ok(fields.iter().filter(|f| f.filename.is_some()).collect())
    }

    pub fn cookie_jar(&mut self) -> &CookieJar {
        if self.cookie_jar.is_none() {
            let jar = self
                .request
                .header(b"cookie")
                .map(CookieJar::parse)
                .unwrap_or_default();
            self.cookie_jar = Some(jar);
        }
        self.cookie_jar.as_ref().unwrap()
    }

    pub fn cookie(&mut self, name: &str) -> Option<String> {
        self.cookie_jar().get(name).map(|v| v.to_string())
    }

    /// Queues a `Set-Cookie` header, appended (not replacing) so
    /// multiple cookies in one response are honored.
    pub fn set_cookie(&mut self, cookie: SetCookie) {
        self.pending_set_cookies.push(cookie);
    }

    pub fn delete_cookie(&mut self, name: &str) {
        self.pending_set_cookies.push(SetCookie::expired(name));
    }

    /// Returns the session named by the configured cookie, loading it
    /// from the store on first call. `None` if no session cookie was
    /// sent or no [`SessionManager`] is attached.
    pub fn get_session(&mut self) -> Option<&Session> {
        if self.session.is_none() {
            let manager = self.session_manager.clone()?;
            let id = self.cookie(manager.cookie_name())?;
            self.session = manager.get(&id).ok();
        }
        self.session.as_ref()
    }

    /// Sets `key` to `value` on this request's session, creating one
    /// (and queuing its `Set-Cookie`) if none exists yet.
    pub fn set_session_value(&mut self, key: &str, value: &str) -> Result<(), SessionError> {
        let manager = self
            .session_manager
            .clone()
            .ok_or_else(|| SessionError::NotFound("no session manager attached".to_string()))?;

        if self.session.is_none() && self.get_session().is_none() {
            let (session, cookie) = manager.create()?;
            self.session = Some(session);
            self.pending_set_cookies.push(cookie);
        }

        let id = self.session.as_ref().unwrap().id.clone();
        manager.set_value(&id, key, value)?;
        if let Some(session) = self.session.as_mut() {
            session.data.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    /// Destroys this request's session, if any, and clears its cookie.
    pub fn destroy_session(&mut self) -> Result<(), SessionError> {
        let Some(manager) = self.session_manager.clone() else {
            return Ok(());
        };
        if let Some(session) = self.session.take() {
            manager.destroy(&session.id)?;
            self.delete_cookie(manager.cookie_name());
        }
        Ok(())
    }

    /// Flushes queued `Set-Cookie` headers onto the response. Called by
    /// the connection loop right before serialization.
    pub(crate) fn flush_cookies(&mut self) {
        for cookie in self.pending_set_cookies.drain(..) {
            self.response
                .add_header(b"set-cookie".to_vec(), cookie.to_header_value().into_bytes());
        }
    }

    pub fn set_state<T: Any + Send>(&mut self, value: T) {
        self.state.set(value);
    }

    pub fn get_state<T: Any + Send>(&self) -> Option<&T> {
        self.state.get::<T>()
    }

    pub fn get_state_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.state.get_mut::<T>()
    }

    /// Writes a 500 JSON error body, used when a handler/middleware
    /// errors out (spec.md §7 "application errors").
    pub(crate) fn write_internal_error(&mut self, message: &str) {
        self.response.status(StatusCode::InternalServerError);
        let _ = self.response.write_json(&serde_json::json!({
            "error": message,
            "code": "INTERNAL_ERROR",
        }));
    }
}

fn generate_request_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
