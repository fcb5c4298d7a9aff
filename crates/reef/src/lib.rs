//! reef - Redis-compatible storage server over an ordered KV engine
//!
//! Logical values are encoded as record sets in a single ordered keyspace
//! (see the `storage` crate); commands run under per-key segment locks and
//! talk to the engine through snapshot transactions. The DUMP/RESTORE
//! family serializes values to and from the Redis RDB payload format (see
//! the `rdb` crate).

pub mod commands;
pub mod config;
pub mod segment;
pub mod server;
pub mod session;

pub use config::Config;
pub use server::{RespServer, ServerEntry};
pub use session::{Session, SessionCtx};
