//! One bridge session per rover id.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::api::RoverApi;
use crate::media::MediaEngine;
use crate::session::{BridgeSession, SessionSettings, SessionStatus};

/// Memoizes sessions by rover id. Pass it to whatever needs a session rather
/// than creating sessions directly, so a rover never gets two sockets.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, BridgeSession>>>,
    engine: Option<Arc<dyn MediaEngine>>,
    api: Option<RoverApi>,
}

impl SessionRegistry {
    pub fn new(engine: Option<Arc<dyn MediaEngine>>, api: Option<RoverApi>) -> Self {
        Self {
            sessions: Arc::default(),
            engine,
            api,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BridgeSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The existing session for `settings.rover_id`, or a new one built
    /// from `settings`. Settings are ignored when a session already exists.
    pub fn get_or_create(&self, settings: SessionSettings) -> BridgeSession {
        let mut sessions = self.lock();
        sessions
            .entry(settings.rover_id.clone())
            .or_insert_with(|| {
                info!(rover_id = %settings.rover_id, "creating bridge session");
                BridgeSession::new(settings, self.engine.clone(), self.api.clone())
            })
            .clone()
    }

    pub fn get(&self, rover_id: &str) -> Option<BridgeSession> {
        self.lock().get(rover_id).cloned()
    }

    /// Disconnect and forget one session.
    pub fn remove(&self, rover_id: &str) -> bool {
        let removed = self.lock().remove(rover_id);
        match removed {
            Some(session) => {
                session.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect every session and forget them all.
    pub fn disconnect_all(&self) {
        let sessions: Vec<BridgeSession> = self.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.disconnect();
        }
    }

    /// Status of every session, ordered by rover id.
    pub fn statuses(&self) -> Vec<SessionStatus> {
        let sessions: Vec<BridgeSession> = self.lock().values().cloned().collect();
        let mut statuses: Vec<SessionStatus> = sessions.iter().map(BridgeSession::status).collect();
        statuses.sort_by(|a, b| a.rover_id.cmp(&b.rover_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
