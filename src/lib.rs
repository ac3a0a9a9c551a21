pub mod auth;
pub mod config;
pub mod http;
pub mod inspect;
pub mod metastore;
pub mod metrics;
