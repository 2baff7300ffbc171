pub mod audit;
pub mod auth;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod http;
pub mod identity;
pub mod incidents;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod roster;
pub mod snapshot;
