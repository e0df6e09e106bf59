mod gateway;
mod session;

pub use gateway::{EventStream, Gateway, GatewayError, GatewayResponse};
pub use session::session_id;
