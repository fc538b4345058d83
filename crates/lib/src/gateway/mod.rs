//! Gateway: HTTP + WebSocket front door for the website chat.
//!
//! Single port serves the chat socket (`/ws`), the login routes and the announcement board.
//! Protocol: first frame must be `init`; then `message` and `heartbeat` frames.

mod auth;
mod connections;
mod protocol;
mod rate_limit;
mod relay;
mod server;

pub use connections::{ConnectionId, ConnectionManager, HandshakeMeta, Outbound};
pub use protocol::{close_codes, parse_client_frame, ClientEnvelope, Sender, ServerEnvelope};
pub use rate_limit::SlidingWindow;
pub use relay::{ticket_channel_name, Delivery, InboundOutcome, Relay, RelaySettings, Teardown};
pub use server::{router, run_gateway, serve, GatewayEvent, GatewayState};
