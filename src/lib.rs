//! Secret Sync - distribute secret files to AWS Secrets Manager and load them
//! into a service environment at boot.
//!
//! The push path reads a directory of `KEY=VALUE` files ([`source`]) and
//! upserts one record per file ([`pusher`]). The boot path discovers the
//! application's records ([`injector`]) and exports them into the process
//! environment ([`environment`]) before the service starts ([`boot`]).

pub mod boot;
pub mod config;
pub mod environment;
pub mod error;
pub mod injector;
pub mod logging;
pub mod pusher;
pub mod source;
pub mod store;

pub use error::SyncError;
