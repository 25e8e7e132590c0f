use async_trait::async_trait;
use sqlx::PgPool;

use super::{NewUser, UserStore};

pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn save(&self, user: &NewUser) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO users (name, email, phone, website) VALUES ($1, $2, $3, $4)")
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.phone)
            .bind(&user.website)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
