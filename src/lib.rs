//! Harvests baseball rosters and season statistics from collegiate
//! athletics sites across three divisions. Roughly a thousand sources, no
//! two alike: the parsers are chains of strategies ordered from most to
//! least structured, the transport assumes every site is flaky, and the
//! recovery pass rebuilds dead entries from conference directories.

pub mod config;
pub mod db;
pub mod discover;
pub mod error;
pub mod fetch;
pub mod parse;
pub mod pipeline;
pub mod recover;
pub mod registry;
pub mod render;
pub mod resolve;
pub mod schedule;
