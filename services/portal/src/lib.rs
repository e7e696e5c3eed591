pub mod adapters;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod panel;
pub mod remote;
pub mod session;
pub mod store;
pub mod validation;
