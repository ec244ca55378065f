//! zonegate
//!
//! An authorizing proxy for the PowerDNS HTTP API. Callers present a token
//! that selects an environment; the environment's policy decides which zones
//! and records the caller may read, change or administer.
//!
//! # Architecture
//!
//! The crate is divided into two main modules:
//! * `dns` - Policy model, request resolution and the authorization engine
//! * `web` - HTTP front end, upstream client, audit log and metrics

/// Policy model and authorization
pub mod dns;

/// HTTP gateway to the PowerDNS API
pub mod web;
