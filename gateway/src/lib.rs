pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod state;
