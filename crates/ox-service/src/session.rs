//! Session state machine and the ordered event queue.
//!
//! The current state and the active session handle live in the shared
//! header page so the client's hot path can read them without a round
//! trip; the event queue stays service-side and is drained one event per
//! `GetNextEvent` request.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::info;

use ox_protocol::{monotonic_ns, SessionState, SessionStateEvent, SharedData};

/// Queue bound; the oldest event is dropped on overflow. A client polling
/// at frame cadence never comes close.
const MAX_QUEUED_EVENTS: usize = 256;

pub struct SessionManager {
    events: Mutex<VecDeque<SessionStateEvent>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Move the session to `new_state` if it is not already there, and
    /// queue the transition event. The event carries whatever session
    /// handle is active at transition time.
    pub fn transition(&self, shared: &SharedData, new_state: SessionState) {
        if shared.session_state() == new_state {
            return;
        }
        shared.set_session_state(new_state);

        let event = SessionStateEvent {
            session_handle: shared.active_session_handle(),
            state: new_state,
            timestamp: monotonic_ns(),
        };

        let mut events = self.events.lock().expect("event queue poisoned");
        if events.len() == MAX_QUEUED_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
        info!(state = ?new_state, "session state transition");
    }

    /// Pop the oldest queued event.
    pub fn next_event(&self) -> Option<SessionStateEvent> {
        self.events.lock().expect("event queue poisoned").pop_front()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
