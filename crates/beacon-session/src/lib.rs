//! Beacon Session - session lifecycle controller
//!
//! The [`SessionController`] owns the in-memory state of the current
//! session and is the only writer of open session rows. Transitions update
//! memory under a mutex and queue the matching store writes without waiting
//! for them, so every public method returns immediately.
//!
//! ## States
//!
//! ```text
//!              enable / start_new_session
//!  NoSession ─────────────────────────────→ OpenForeground ⇄ OpenBackground
//!      ▲                                         │      set_app_state
//!      └──── disable ────────────────────────────┤
//!                                                ▼ end_current_session
//!                                              Ended (or a fresh open session
//!                                                     when restart_on_end)
//! ```

pub mod controller;
pub mod observer;

pub use controller::{SessionController, SessionState};
pub use observer::SessionObserver;
