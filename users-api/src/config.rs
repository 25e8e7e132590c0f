use std::net::SocketAddr;

use envconfig::Envconfig;
use tracing::Level;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Postgres connection string. Required: the service cannot start
    /// without its datastore.
    pub database_url: String,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    pub otel_url: Option<String>,

    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,

    #[envconfig(default = "users-api")]
    pub otel_service_name: String,

    // Used for integration tests
    #[envconfig(default = "true")]
    pub export_prometheus: bool,

    #[envconfig(default = "5")]
    pub database_ready_max_attempts: u32,

    #[envconfig(default = "10")]
    pub max_pg_connections: u32,

    /// Base URL of the upstream user directory the /users route proxies.
    #[envconfig(default = "https://jsonplaceholder.typicode.com")]
    pub user_directory_url: String,

    #[envconfig(default = "info")]
    pub log_level: Level,
}
