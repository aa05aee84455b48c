mod auth;
mod framing;
mod handlers;
mod server;
mod web;

pub use auth::{UNAUTHORIZED_ID, authorize, unauthorized_record, unauthorized_response};
pub use framing::{FrameEncoder, Framing, SSE_DONE, sse_record};
pub use handlers::{Flag, TurnParams};
pub use server::{AppState, ProxyServer, create_router};
pub use web::{WEB_API_MODEL, WebEnvelope};
