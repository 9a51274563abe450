//! Cache-first access to daily news and terms with offline fallback.
//!
//! [`repository::ResourceRepository`] ties together the local cache
//! ([`cache`]), connectivity tracking ([`network`]) and the remote backend
//! ([`remote`]).

pub mod cache;
pub mod config;
pub mod models;
pub mod network;
pub mod remote;
pub mod repository;
