use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;

/// One atomic schema change. Versions order the plan; a step either fully
/// applies (and the cursor advances) or fails (and it does not).
#[derive(Debug, Clone, Copy)]
pub struct MigrationStep {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration plan is not strictly ascending at version {0}")]
    UnorderedPlan(i64),

    #[error("could not read migration history: {0}")]
    History(#[source] anyhow::Error),

    #[error("migration {version} ({description}) failed: {source}")]
    StepFailed {
        version: i64,
        description: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Ordered sequence of schema changes. Construction rejects any plan whose
/// versions are not strictly ascending, so downstream code can rely on the
/// ordering invariant.
#[derive(Debug)]
pub struct MigrationPlan {
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    pub fn new(steps: Vec<MigrationStep>) -> Result<Self, MigrationError> {
        for pair in steps.windows(2) {
            if pair[1].version <= pair[0].version {
                return Err(MigrationError::UnorderedPlan(pair[1].version));
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// The schema steps this service needs, compiled into the binary.
pub fn embedded_plan() -> MigrationPlan {
    MigrationPlan::new(vec![
        MigrationStep {
            version: 1,
            description: "create users table",
            sql: include_str!("../migrations/0001_create_users.sql"),
        },
        MigrationStep {
            version: 2,
            description: "index users by email",
            sql: include_str!("../migrations/0002_index_users_email.sql"),
        },
    ])
    .expect("embedded migration plan must be ordered")
}

/// Storage backend for the migration gate: reports how many steps have been
/// applied and applies one step atomically.
#[async_trait]
pub trait MigrationStore {
    async fn applied_count(&self) -> anyhow::Result<usize>;
    async fn apply(&self, step: &MigrationStep) -> anyhow::Result<()>;
}

/// Apply up to `limit` pending steps from `plan`, in ascending order,
/// starting at the store's current cursor. Aborts on the first failure:
/// serving traffic against an unknown schema state is never acceptable,
/// so the caller must treat any error as fatal.
///
/// Assumes a single migrating process; concurrent invocation from several
/// instances against the same database is not made safe here.
pub async fn apply_pending(
    plan: &MigrationPlan,
    store: &(dyn MigrationStore + Send + Sync),
    limit: usize,
) -> Result<usize, MigrationError> {
    let cursor = store.applied_count().await.map_err(MigrationError::History)?;

    let mut applied = 0usize;
    for step in plan.steps().iter().skip(cursor).take(limit) {
        store
            .apply(step)
            .await
            .map_err(|source| MigrationError::StepFailed {
                version: step.version,
                description: step.description,
                source,
            })?;
        applied += 1;
        info!(
            "applied migration {} ({})",
            step.version, step.description
        );
    }

    Ok(applied)
}

pub struct PgMigrationStore {
    pool: PgPool,
}

impl PgMigrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MigrationStore for PgMigrationStore {
    async fn applied_count(&self) -> anyhow::Result<usize> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _users_api_migrations (\
             version BIGINT PRIMARY KEY, \
             description TEXT NOT NULL, \
             applied_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        )
        .execute(&self.pool)
        .await?;

        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM _users_api_migrations")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    async fn apply(&self, step: &MigrationStep) -> anyhow::Result<()> {
        // The step SQL and the history row commit together, so a failure
        // leaves no half-applied step behind.
        let mut tx = self.pool.begin().await?;
        sqlx::query(step.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO _users_api_migrations (version, description) VALUES ($1, $2)")
            .bind(step.version)
            .bind(step.description)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    fn step(version: i64) -> MigrationStep {
        MigrationStep {
            version,
            description: "test step",
            sql: "SELECT 1",
        }
    }

    /// In-memory store; optionally fails when asked to apply `fail_at`.
    struct FakeStore {
        applied: Mutex<Vec<i64>>,
        fail_at: Option<i64>,
    }

    impl FakeStore {
        fn new(fail_at: Option<i64>) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_at,
            }
        }

        fn applied_versions(&self) -> Vec<i64> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MigrationStore for FakeStore {
        async fn applied_count(&self) -> anyhow::Result<usize> {
            Ok(self.applied.lock().unwrap().len())
        }

        async fn apply(&self, step: &MigrationStep) -> anyhow::Result<()> {
            if self.fail_at == Some(step.version) {
                anyhow::bail!("syntax error near line 1")
            }
            self.applied.lock().unwrap().push(step.version);
            Ok(())
        }
    }

    #[test]
    fn plan_rejects_out_of_order_versions() {
        let err = MigrationPlan::new(vec![step(1), step(3), step(2)]).unwrap_err();
        assert!(matches!(err, MigrationError::UnorderedPlan(2)));

        let err = MigrationPlan::new(vec![step(1), step(1)]).unwrap_err();
        assert!(matches!(err, MigrationError::UnorderedPlan(1)));
    }

    #[tokio::test]
    async fn applies_steps_in_ascending_order() {
        let plan = MigrationPlan::new(vec![step(1), step(2), step(3)]).unwrap();
        let store = FakeStore::new(None);

        let applied = apply_pending(&plan, &store, plan.len()).await.unwrap();
        assert_eq!(applied, 3);
        assert_eq!(store.applied_versions(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn limit_caps_the_number_of_steps() {
        let plan = MigrationPlan::new(vec![step(1), step(2), step(3)]).unwrap();
        let store = FakeStore::new(None);

        let applied = apply_pending(&plan, &store, 2).await.unwrap();
        assert_eq!(applied, 2);
        assert_eq!(store.applied_versions(), vec![1, 2]);

        // Second run resumes from the cursor and applies only the remainder.
        let applied = apply_pending(&plan, &store, plan.len()).await.unwrap();
        assert_eq!(applied, 1);
        assert_eq!(store.applied_versions(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn failure_aborts_with_cursor_before_the_failed_step() {
        let plan = MigrationPlan::new(vec![step(1), step(2), step(3)]).unwrap();
        let store = FakeStore::new(Some(2));

        let err = apply_pending(&plan, &store, plan.len()).await.unwrap_err();
        assert!(matches!(err, MigrationError::StepFailed { version: 2, .. }));
        // Step 1 applied, nothing at or past the failure.
        assert_eq!(store.applied_versions(), vec![1]);
    }

    #[tokio::test]
    async fn completed_plan_is_a_no_op() {
        let plan = MigrationPlan::new(vec![step(1), step(2)]).unwrap();
        let store = FakeStore::new(None);

        apply_pending(&plan, &store, plan.len()).await.unwrap();
        let applied = apply_pending(&plan, &store, plan.len()).await.unwrap();
        assert_eq!(applied, 0);
        assert_eq!(store.applied_versions(), vec![1, 2]);
    }

    #[test]
    fn embedded_plan_is_valid() {
        let plan = embedded_plan();
        assert_eq!(plan.len(), 2);
    }
}
