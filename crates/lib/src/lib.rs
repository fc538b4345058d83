//! Helpdesk core library: relays website support chats to private Discord ticket channels.
//!
//! Used by the `helpdesk` CLI for the gateway server and the terminal chat client.

pub mod announcements;
pub mod block;
pub mod channels;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod init;
pub mod oauth;
pub mod routing;
pub mod session;
