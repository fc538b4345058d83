//! Support platform connectors (Discord).
//!
//! The relay talks to the platform through [`SupportPlatform`]; inbound platform messages
//! arrive as [`PlatformMessage`] on an mpsc channel consumed by the relay.

mod discord;
mod inbound;
mod platform;

pub use discord::DiscordChannel;
pub use inbound::{Attachment, PlatformMessage};
pub use platform::{PlatformError, SupportPlatform};

#[cfg(test)]
pub(crate) mod fake;
