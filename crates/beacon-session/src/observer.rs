//! Session boundary notifications

use beacon_core::domain::SessionRecord;

/// Receives session boundary notifications from the controller
///
/// Callbacks run on the caller's thread after the controller released its
/// lock, in transition order. They must not block.
pub trait SessionObserver: Send + Sync {
    /// A session was opened
    fn on_new_session(&self, session: &SessionRecord);

    /// A session was closed; `session.end_time` is set
    fn on_session_ended(&self, session: &SessionRecord);
}
