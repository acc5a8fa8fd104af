//! Session storage for the boundary layer.

use crate::core::error::SessionError;
use crate::core::types::ImageValue;
use crate::session::ImageSession;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Handle to one stored session. Chains hold the lock for their whole run,
/// so each session has a single writer at a time.
pub type SharedSession = Arc<Mutex<ImageSession>>;

/// Sessions keyed by id.
///
/// The store is an ordinary value owned by whoever serves requests; nothing
/// about it is process-global.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, SharedSession>>,
}

impl SessionStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for an uploaded image and return its id.
    pub fn create(&self, image: ImageValue) -> Uuid {
        let session = ImageSession::new(image);
        let id = session.id();
        self.sessions.lock().insert(id, Arc::new(Mutex::new(session)));
        debug!("Created session {}", id);
        id
    }

    /// Look up a session.
    pub fn get(&self, id: Uuid) -> Result<SharedSession, SessionError> {
        self.sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Drop a session.
    pub fn remove(&self, id: Uuid) -> Result<(), SessionError> {
        match self.sessions.lock().remove(&id) {
            Some(_) => {
                debug!("Removed session {}", id);
                Ok(())
            }
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Reset a session to its uploaded image.
    pub fn reset(&self, id: Uuid) -> Result<(), SessionError> {
        let session = self.get(id)?;
        session.lock().reset();
        Ok(())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn image() -> ImageValue {
        ImageValue::new(DynamicImage::ImageRgb8(RgbImage::new(4, 4)))
    }

    #[test]
    fn test_stores_are_independent() {
        let a = SessionStore::new();
        let b = SessionStore::new();
        let id = a.create(image());
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert!(matches!(b.get(id), Err(SessionError::NotFound(_))));
    }

    #[test]
    fn test_reset_and_remove() {
        let store = SessionStore::new();
        let id = store.create(image());
        {
            let session = store.get(id).unwrap();
            let small = ImageValue::new(DynamicImage::ImageRgb8(RgbImage::new(2, 2)));
            session.lock().update_current(small);
        }
        store.reset(id).unwrap();
        assert_eq!(store.get(id).unwrap().lock().revision(), 0);

        store.remove(id).unwrap();
        assert!(store.is_empty());
        assert!(store.remove(id).is_err());
        assert!(store.reset(id).is_err());
    }
}
