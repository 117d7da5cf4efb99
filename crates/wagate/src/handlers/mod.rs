//! HTTP request handlers.

mod groups;
mod health;
mod send;
mod session;

pub use groups::list_groups;
pub use health::{livez, readyz};
pub use send::{message_status, send_group_message, send_message};
pub use session::logout;
