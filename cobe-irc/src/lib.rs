//! cobe-irc: the small IRC client the cobe bot talks through.
//!
//! - [`irc`]: byte-preserving line codec
//! - [`event`]: events surfaced to the consumer
//! - [`client`]: connection, registration, keepalive and command handle

pub mod client;
pub mod event;
pub mod irc;
