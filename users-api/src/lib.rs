pub mod config;
pub mod instrument;
pub mod migrations;
pub mod prometheus;
pub mod readiness;
pub mod router;
pub mod server;
pub mod users;
