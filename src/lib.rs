//! Broad View - a small blog with a news feed
//!
//! Readers sign up, publish blogs and browse a home feed that mixes
//! the day's technology headlines with locally written posts.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod news;
pub mod routes;
pub mod session;
