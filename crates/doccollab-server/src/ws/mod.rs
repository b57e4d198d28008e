//! The WebSocket session layer.
//!
//! One task per connection ([`session`]), session state and auth machine
//! ([`connection`]), per-document rooms with broadcast fan-out ([`rooms`]),
//! message decode/validation/dispatch ([`router`]), and the
//! persist-then-publish relay ([`relay`]).

pub mod connection;
pub mod relay;
pub mod rooms;
pub mod router;
pub mod session;

pub use connection::{AuthState, ClientConnection};
pub use relay::ContentRelay;
pub use rooms::RoomRegistry;
pub use router::{MessageRouter, SessionError};
pub use session::run_ws_session;
