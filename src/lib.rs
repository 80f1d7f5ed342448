//! tenantstore - multi-tenant datastore layer
//!
//! One persistence contract ([`interfaces::Persister`]) satisfied by a
//! document engine (MongoDB, one database per base) and a relational engine
//! (PostgreSQL, one schema per base). Callers choose the engine once at
//! start through [`storage::init_storage`] and never branch on it again.

pub mod config;
pub mod id;
pub mod interfaces;
pub mod migration;
pub mod model;
pub mod publisher;
pub mod query;
pub mod storage;
pub mod utils;
