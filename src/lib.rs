//! Routes queued payments to a `default` or `fallback` upstream processor,
//! sharing circuit and health state between instances through Redis.

pub mod cache;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod controller;
pub mod db;
pub mod error_handling;
pub mod health;
pub mod payment_processors;
pub mod queue;
pub mod repository;
pub mod router;
pub mod store;
pub mod structs;
pub mod worker;
