//! Client side of a conversation: relay link, send/receive reconciliation and
//! the task that ties them together.

pub mod controller;
pub mod handle;
pub mod link;

pub use controller::{ReceiveOutcome, SendOutcome, SessionController, SessionState};
pub use handle::SessionHandle;
pub use link::{Backoff, LinkEvent};
