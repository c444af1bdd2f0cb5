//! inbox-sentry: forward keyword hits from an inbox to a chat, purge the rest.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;
