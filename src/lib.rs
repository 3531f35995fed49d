//! Offline-first sync core for a content-discovery client.
//!
//! [`sync::FetchOrchestrator`] composes the HTTP client ([`api`]), the
//! durable entity cache ([`cache`]) and the reactive global state
//! ([`store`]).

pub mod api;
pub mod cache;
pub mod config;
pub mod query;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;
