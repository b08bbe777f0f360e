//! SQLite storage backend.
//!
//! Rows are stored as JSON documents alongside the columns queries filter on.
//! Skill counters and bucket versions are real columns so the atomic updates
//! happen in SQL inside a transaction rather than in process memory.

use async_trait::async_trait;
use chrono::SecondsFormat;
use skillmem_core::{
    BucketKey, DecisionId, Domain, JudgeInsight, JudgeMode, SkillFilter, SkillId, SkillPolicy,
    SkillRecommendation, SkillRecord, Time, TradeOutcome,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, Transaction};
use std::str::FromStr;
use tracing::debug;

use super::trait_::{AppliedOutcome, BucketCommit, Result, Storage, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

fn ts(t: Time) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn mode_key(mode: JudgeMode) -> &'static str {
    match mode {
        JudgeMode::PostHoc => "post_hoc",
        JudgeMode::Inline => "inline",
    }
}

impl SqliteStorage {
    /// Open (or create) a database file.
    pub async fn new(db_path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Pinned to one connection: each connection would otherwise get its own
    /// empty in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS skills (
                id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                skill_type TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                times_applied INTEGER NOT NULL DEFAULT 0,
                times_successful INTEGER NOT NULL DEFAULT 0,
                data TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS bucket_versions (
                domain TEXT NOT NULL,
                skill_type TEXT NOT NULL,
                version INTEGER NOT NULL,
                PRIMARY KEY (domain, skill_type)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS recommendations (
                decision_id TEXT NOT NULL,
                skill_id TEXT NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (decision_id, skill_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS insights (
                decision_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                domain TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (decision_id, mode)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skills_bucket ON skills(domain, skill_type, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_insights_domain ON insights(domain, created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Rebuild a skill from its document, trusting the counter columns.
    fn skill_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SkillRecord> {
        let data: String = row.try_get("data")?;
        let mut skill: SkillRecord = serde_json::from_str(&data)?;
        let applied: i64 = row.try_get("times_applied")?;
        let successful: i64 = row.try_get("times_successful")?;
        skill.times_applied = applied as u32;
        skill.times_successful = successful as u32;
        Ok(skill)
    }

    async fn write_skill(tx: &mut Transaction<'_, Sqlite>, skill: &SkillRecord) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO skills
                (id, domain, skill_type, status, created_at, expires_at, times_applied, times_successful, data)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(skill.id.to_string())
        .bind(skill.domain.as_str())
        .bind(skill.skill_type.as_str())
        .bind(skill.status.as_str())
        .bind(ts(skill.created_at))
        .bind(ts(skill.expires_at))
        .bind(skill.times_applied as i64)
        .bind(skill.times_successful as i64)
        .bind(serde_json::to_string(skill)?)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn load_skill_tx(tx: &mut Transaction<'_, Sqlite>, id: SkillId) -> Result<Option<SkillRecord>> {
        let row = sqlx::query("SELECT data, times_applied, times_successful FROM skills WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(Self::skill_from_row).transpose()
    }

    async fn bump_version(tx: &mut Transaction<'_, Sqlite>, bucket: BucketKey) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO bucket_versions (domain, skill_type, version) VALUES (?, ?, 0)")
            .bind(bucket.domain.as_str())
            .bind(bucket.skill_type.as_str())
            .execute(&mut **tx)
            .await?;
        sqlx::query("UPDATE bucket_versions SET version = version + 1 WHERE domain = ? AND skill_type = ?")
            .bind(bucket.domain.as_str())
            .bind(bucket.skill_type.as_str())
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Check the database responds.
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn load_skill(&self, id: SkillId) -> Result<Option<SkillRecord>> {
        let row = sqlx::query("SELECT data, times_applied, times_successful FROM skills WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::skill_from_row).transpose()
    }

    async fn list_skills(&self, filter: &SkillFilter) -> Result<Vec<SkillRecord>> {
        let mut sql = String::from("SELECT data, times_applied, times_successful FROM skills WHERE 1 = 1");
        if filter.domain.is_some() {
            sql.push_str(" AND domain = ?");
        }
        if filter.skill_type.is_some() {
            sql.push_str(" AND skill_type = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(domain) = filter.domain {
            query = query.bind(domain.as_str());
        }
        if let Some(skill_type) = filter.skill_type {
            query = query.bind(skill_type.as_str());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut skills = Vec::with_capacity(rows.len());
        for row in &rows {
            let skill = Self::skill_from_row(row)?;
            // Status and the derived exclusion flag live in the document.
            if filter.matches(&skill) {
                skills.push(skill);
            }
        }
        Ok(skills)
    }

    async fn count_skills(&self) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM skills").fetch_one(&self.pool).await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn bucket_version(&self, bucket: BucketKey) -> Result<u64> {
        let row = sqlx::query("SELECT version FROM bucket_versions WHERE domain = ? AND skill_type = ?")
            .bind(bucket.domain.as_str())
            .bind(bucket.skill_type.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let v: i64 = row.try_get("version")?;
                Ok(v as u64)
            }
            None => Ok(0),
        }
    }

    async fn commit_bucket(&self, commit: &BucketCommit) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        // Compare-and-swap on the bucket version; takes the write lock first.
        sqlx::query("INSERT OR IGNORE INTO bucket_versions (domain, skill_type, version) VALUES (?, ?, 0)")
            .bind(commit.bucket.domain.as_str())
            .bind(commit.bucket.skill_type.as_str())
            .execute(&mut *tx)
            .await?;
        let swapped = sqlx::query(
            "UPDATE bucket_versions SET version = version + 1
            WHERE domain = ? AND skill_type = ? AND version = ?",
        )
        .bind(commit.bucket.domain.as_str())
        .bind(commit.bucket.skill_type.as_str())
        .bind(commit.expected_version as i64)
        .execute(&mut *tx)
        .await?;
        if swapped.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(StorageError::Conflict(format!(
                "bucket {} moved past version {}",
                commit.bucket, commit.expected_version
            )));
        }

        let now = chrono::Utc::now();
        for (id, merged_into) in &commit.archive {
            let Some(mut skill) = Self::load_skill_tx(&mut tx, *id).await? else {
                tx.rollback().await?;
                return Err(StorageError::NotFound(format!("skill {}", id)));
            };
            if !skill.archive(*merged_into, now) {
                tx.rollback().await?;
                return Err(StorageError::Conflict(format!("skill {} is no longer active", id)));
            }
            Self::write_skill(&mut tx, &skill).await?;
        }

        let mut other_buckets = Vec::new();
        for skill in &commit.insert {
            if Self::load_skill_tx(&mut tx, skill.id).await?.is_some() {
                tx.rollback().await?;
                return Err(StorageError::Duplicate(format!("skill {}", skill.id)));
            }
            Self::write_skill(&mut tx, skill).await?;
            if skill.bucket() != commit.bucket && !other_buckets.contains(&skill.bucket()) {
                other_buckets.push(skill.bucket());
            }
        }
        for bucket in other_buckets {
            Self::bump_version(&mut tx, bucket).await?;
        }

        tx.commit().await?;
        debug!("Committed bucket {} at version {}", commit.bucket, commit.expected_version + 1);
        Ok(commit.expected_version + 1)
    }

    async fn record_application(
        &self,
        id: SkillId,
        successful: bool,
        policy: &SkillPolicy,
    ) -> Result<SkillRecord> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE skills SET times_applied = times_applied + 1,
                times_successful = times_successful + ?
            WHERE id = ?",
        )
        .bind(if successful { 1i64 } else { 0i64 })
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::NotFound(format!("skill {}", id)));
        }

        let Some(mut skill) = Self::load_skill_tx(&mut tx, id).await? else {
            tx.rollback().await?;
            return Err(StorageError::NotFound(format!("skill {}", id)));
        };
        skill.updated_at = chrono::Utc::now();
        skill.recompute_effectiveness(policy);
        Self::write_skill(&mut tx, &skill).await?;

        tx.commit().await?;
        Ok(skill)
    }

    async fn expire_due(&self, now: Time) -> Result<Vec<SkillId>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT data, times_applied, times_successful FROM skills
            WHERE status = 'active' AND expires_at <= ?",
        )
        .bind(ts(now))
        .fetch_all(&mut *tx)
        .await?;

        let mut expired = Vec::new();
        for row in &rows {
            let mut skill = Self::skill_from_row(row)?;
            if skill.expire(now) {
                Self::write_skill(&mut tx, &skill).await?;
                expired.push(skill.id);
            }
        }
        tx.commit().await?;

        expired.sort();
        Ok(expired)
    }

    async fn insert_recommendation(&self, rec: &SkillRecommendation) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO recommendations (decision_id, skill_id, resolved, created_at, data)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(rec.decision_id.as_str())
        .bind(rec.skill_id.to_string())
        .bind(rec.is_resolved() as i64)
        .bind(ts(rec.created_at))
        .bind(serde_json::to_string(rec)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_recommendation(&self, rec: &SkillRecommendation) -> Result<()> {
        let result = sqlx::query(
            "UPDATE recommendations SET data = ?, resolved = ?
            WHERE decision_id = ? AND skill_id = ? AND resolved = 0",
        )
        .bind(serde_json::to_string(rec)?)
        .bind(rec.is_resolved() as i64)
        .bind(rec.decision_id.as_str())
        .bind(rec.skill_id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.load_recommendation(&rec.decision_id, rec.skill_id).await? {
            Some(_) => Err(StorageError::Conflict(format!(
                "recommendation {}/{} already resolved",
                rec.decision_id, rec.skill_id
            ))),
            None => Err(StorageError::NotFound(format!(
                "recommendation {}/{}",
                rec.decision_id, rec.skill_id
            ))),
        }
    }

    async fn load_recommendation(
        &self,
        decision_id: &DecisionId,
        skill_id: SkillId,
    ) -> Result<Option<SkillRecommendation>> {
        let row = sqlx::query("SELECT data FROM recommendations WHERE decision_id = ? AND skill_id = ?")
            .bind(decision_id.as_str())
            .bind(skill_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn list_recommendations(
        &self,
        decision_id: Option<&DecisionId>,
    ) -> Result<Vec<SkillRecommendation>> {
        let rows = match decision_id {
            Some(id) => {
                sqlx::query("SELECT data FROM recommendations WHERE decision_id = ? ORDER BY created_at ASC")
                    .bind(id.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT data FROM recommendations ORDER BY created_at ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn resolve_and_apply(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
        at: Time,
        policy: &SkillPolicy,
    ) -> Result<AppliedOutcome> {
        // Dropping the transaction on any error rolls every row back.
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT data FROM recommendations WHERE decision_id = ? AND resolved = 0")
            .bind(decision_id.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let successful = outcome == TradeOutcome::Profit;
        let mut applied = AppliedOutcome::default();
        for row in &rows {
            let data: String = row.try_get("data")?;
            let mut rec: SkillRecommendation = serde_json::from_str(&data)?;
            if !rec.resolve(outcome, at) {
                continue;
            }
            let updated = sqlx::query(
                "UPDATE recommendations SET data = ?, resolved = 1
                WHERE decision_id = ? AND skill_id = ? AND resolved = 0",
            )
            .bind(serde_json::to_string(&rec)?)
            .bind(rec.decision_id.as_str())
            .bind(rec.skill_id.to_string())
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() != 1 {
                continue;
            }

            if rec.was_applied {
                let counted = sqlx::query(
                    "UPDATE skills SET times_applied = times_applied + 1,
                        times_successful = times_successful + ?
                    WHERE id = ?",
                )
                .bind(if successful { 1i64 } else { 0i64 })
                .bind(rec.skill_id.to_string())
                .execute(&mut *tx)
                .await?;
                match Self::load_skill_tx(&mut tx, rec.skill_id).await? {
                    Some(mut skill) if counted.rows_affected() == 1 => {
                        skill.updated_at = chrono::Utc::now();
                        skill.recompute_effectiveness(policy);
                        Self::write_skill(&mut tx, &skill).await?;
                        applied.counted.push(skill);
                    }
                    _ => applied.missing.push(rec.skill_id),
                }
            }
            applied.resolved.push(rec);
        }
        tx.commit().await?;
        Ok(applied)
    }

    async fn insert_insight(&self, insight: &JudgeInsight) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO insights (decision_id, mode, domain, created_at, data)
            VALUES (?, ?, ?, ?, ?)",
        )
        .bind(insight.decision_id.as_str())
        .bind(mode_key(insight.mode))
        .bind(insight.domain.as_str())
        .bind(ts(insight.created_at))
        .bind(serde_json::to_string(insight)?)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn load_insight(&self, decision_id: &DecisionId, mode: JudgeMode) -> Result<Option<JudgeInsight>> {
        let row = sqlx::query("SELECT data FROM insights WHERE decision_id = ? AND mode = ?")
            .bind(decision_id.as_str())
            .bind(mode_key(mode))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn list_insights(
        &self,
        domain: Option<Domain>,
        mode: Option<JudgeMode>,
        limit: usize,
    ) -> Result<Vec<JudgeInsight>> {
        let mut sql = String::from("SELECT data FROM insights WHERE 1 = 1");
        if domain.is_some() {
            sql.push_str(" AND domain = ?");
        }
        if mode.is_some() {
            sql.push_str(" AND mode = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(domain) = domain {
            query = query.bind(domain.as_str());
        }
        if let Some(mode) = mode {
            query = query.bind(mode_key(mode));
        }
        let rows = query.bind(limit as i64).fetch_all(&self.pool).await?;

        rows.iter()
            .map(|row| {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn attach_insight_outcome(
        &self,
        decision_id: &DecisionId,
        outcome: TradeOutcome,
    ) -> Result<Vec<JudgeInsight>> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query("SELECT data FROM insights WHERE decision_id = ?")
            .bind(decision_id.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let mut updated = Vec::new();
        for row in &rows {
            let data: String = row.try_get("data")?;
            let mut insight: JudgeInsight = serde_json::from_str(&data)?;
            if insight.actual_outcome.is_some() {
                continue;
            }
            insight.attach_outcome(outcome);
            sqlx::query("UPDATE insights SET data = ? WHERE decision_id = ? AND mode = ?")
                .bind(serde_json::to_string(&insight)?)
                .bind(insight.decision_id.as_str())
                .bind(mode_key(insight.mode))
                .execute(&mut *tx)
                .await?;
            updated.push(insight);
        }
        tx.commit().await?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillmem_core::{SkillStatus, SkillType};

    fn skill() -> SkillRecord {
        SkillRecord::new(Domain::Perps, SkillType::Warning, "Avoid thin books", "body", &SkillPolicy::default())
    }

    #[tokio::test]
    async fn test_health_check() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        assert!(storage.health_check().await);
    }

    #[tokio::test]
    async fn test_bucket_cas() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let a = skill();
        assert_eq!(storage.commit_bucket(&BucketCommit::insert(a.clone(), 0)).await.unwrap(), 1);
        let err = storage.commit_bucket(&BucketCommit::insert(skill(), 0)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(storage.count_skills().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counters_and_expiry() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let a = skill().with_created_at(chrono::Utc::now() - chrono::Duration::days(61));
        storage.commit_bucket(&BucketCommit::insert(a.clone(), 0)).await.unwrap();

        let policy = SkillPolicy::default();
        storage.record_application(a.id, true, &policy).await.unwrap();
        let after = storage.record_application(a.id, false, &policy).await.unwrap();
        assert_eq!((after.times_applied, after.times_successful), (2, 1));
        assert_eq!(after.success_rate, Some(0.5));

        assert_eq!(storage.expire_due(chrono::Utc::now()).await.unwrap(), vec![a.id]);
        assert!(storage.expire_due(chrono::Utc::now()).await.unwrap().is_empty());
        let loaded = storage.load_skill(a.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SkillStatus::Expired);
    }

    #[tokio::test]
    async fn test_resolution_counts_in_same_transaction() {
        let storage = SqliteStorage::in_memory().await.unwrap();
        let a = skill();
        storage.commit_bucket(&BucketCommit::insert(a.clone(), 0)).await.unwrap();
        let mut rec = SkillRecommendation::new("perps-3".into(), a.id, 0.6);
        rec.was_applied = true;
        storage.insert_recommendation(&rec).await.unwrap();

        let policy = SkillPolicy::default();
        let now = chrono::Utc::now();
        let first = storage.resolve_and_apply(&rec.decision_id, TradeOutcome::Profit, now, &policy).await.unwrap();
        assert_eq!(first.counted.len(), 1);
        assert_eq!(first.counted[0].success_rate, Some(1.0));
        let again = storage.resolve_and_apply(&rec.decision_id, TradeOutcome::Profit, now, &policy).await.unwrap();
        assert_eq!(again, AppliedOutcome::default());

        let loaded = storage.load_skill(a.id).await.unwrap().unwrap();
        assert_eq!((loaded.times_applied, loaded.times_successful), (1, 1));
    }
}
