//! Policy evaluation
//!
//! # Module Structure
//!
//! * `name` - Name normalization and matching helpers
//! * `config` - Configuration file model
//! * `policy` - Compiled environments and the swappable policy store
//! * `resolve` - Maps API calls onto resources
//! * `authorize` - Decides whether an environment may access a resource
//! * `context` - Shared state of the running proxy

/// Authorization engine
pub mod authorize;

/// Configuration file model and validation
pub mod config;

/// Process wide state
pub mod context;

/// Domain name normalization
pub mod name;

/// Compiled environments and zone grants
pub mod policy;

/// Request to resource resolution
pub mod resolve;
