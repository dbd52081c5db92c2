pub mod annotation;
pub mod authz;
pub mod document;
pub mod elastic;
pub mod error;
pub mod identity;
pub mod index;
pub mod memory;
pub mod permissions;
pub mod protocol;
pub mod query;
pub mod server;
pub mod types;
