//! cobe: a Markov chain chat bot.
//!
//! Learns from text files, IRC logs, an interactive console and live IRC
//! channels, and answers with sentences generated from what it learned.
//! Every surface funnels into the [`engine::Engine`] trait; the default
//! engine is the SQLite-backed [`brain::Brain`].

pub mod brain;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod policy;
pub mod session;
