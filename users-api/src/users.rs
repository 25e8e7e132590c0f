pub mod directory;
pub mod handler;
pub mod repository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub website: String,
}

/// Remote user directory the listing route proxies.
#[async_trait]
pub trait UserDirectory {
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;
}

/// Persistence for locally created users.
#[async_trait]
pub trait UserStore {
    async fn save(&self, user: &NewUser) -> anyhow::Result<()>;
}
