//! Crash reporter wiring

use std::sync::Arc;

use beacon_core::domain::SessionRecord;
use beacon_core::ports::ICrashReporter;
use beacon_session::SessionObserver;

/// Keeps the crash reporter's current session in step with the controller
pub struct CrashSessionObserver {
    reporter: Arc<dyn ICrashReporter>,
}

impl CrashSessionObserver {
    pub fn new(reporter: Arc<dyn ICrashReporter>) -> Self {
        Self { reporter }
    }
}

impl SessionObserver for CrashSessionObserver {
    fn on_new_session(&self, session: &SessionRecord) {
        self.reporter.set_current_session_id(Some(session.id.clone()));
    }

    fn on_session_ended(&self, session: &SessionRecord) {
        if self.reporter.current_session_id().as_ref() == Some(&session.id) {
            self.reporter.set_current_session_id(None);
        }
    }
}
