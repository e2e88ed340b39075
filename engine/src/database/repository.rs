//! Repository layer for database operations
//!
//! This module provides the record-store contract the engine runs on:
//! bulletin and client reads, guarded state transitions, period counts
//! and the notification log. Business rules live in the services; the
//! repository only enforces them at the row level through guarded updates.

use super::models::*;
use super::schema::ensure_notification_log_schema;
use crate::config::{IMPORTANCE_PENDING, NOTICE_STATUS_SENT};
use crate::error::{AppError, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeMap;

const BULLETIN_ORDER: &str = "ORDER BY bulletin_number ASC, order_number ASC, id ASC";

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ===== Bulletins =====

    /// Ingest a bulletin line item
    pub async fn insert_bulletin(&self, req: NewBulletinRecord) -> Result<BulletinRecord> {
        if req.titular.trim().is_empty() {
            return Err(AppError::Validation("titular must not be empty".to_string()));
        }

        let created_at = req.created_at.unwrap_or_else(Utc::now);
        let importance = req
            .importance
            .unwrap_or_else(|| IMPORTANCE_PENDING.to_string());

        let record = sqlx::query_as::<_, BulletinRecord>(
            r#"
            INSERT INTO bulletins (
                titular, bulletin_number, bulletin_date, order_number, applicant, agent,
                file_number, class, custody_mark, published_mark, importance, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(req.titular.trim())
        .bind(req.bulletin_number)
        .bind(&req.bulletin_date)
        .bind(req.order_number)
        .bind(&req.applicant)
        .bind(&req.agent)
        .bind(&req.file_number)
        .bind(&req.class)
        .bind(&req.custody_mark)
        .bind(&req.published_mark)
        .bind(&importance)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Inserted bulletin record: {} for {}", record.id, record.titular);
        Ok(record)
    }

    /// Get a bulletin record by ID
    pub async fn get_bulletin(&self, id: i64) -> Result<BulletinRecord> {
        self.find_bulletin(id)
            .await?
            .ok_or(AppError::RecordNotFound(id))
    }

    pub async fn find_bulletin(&self, id: i64) -> Result<Option<BulletinRecord>> {
        let record = sqlx::query_as::<_, BulletinRecord>("SELECT * FROM bulletins WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Records without a generated report, whatever their importance
    pub async fn list_ungenerated(&self) -> Result<Vec<BulletinRecord>> {
        let records = sqlx::query_as::<_, BulletinRecord>(&format!(
            "SELECT * FROM bulletins WHERE report_generated = 0 {}",
            BULLETIN_ORDER
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Generated but unsent records, joined with their titular's email
    pub async fn list_unsent(&self) -> Result<Vec<SendCandidate>> {
        let candidates = sqlx::query_as::<_, SendCandidate>(
            r#"
            SELECT b.*, c.email AS email
            FROM bulletins b
            LEFT JOIN clients c ON c.titular = b.titular
            WHERE b.report_generated = 1 AND b.report_sent = 0
            ORDER BY b.bulletin_number ASC, b.order_number ASC, b.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(candidates)
    }

    /// Record a reviewer's importance decision.
    ///
    /// A record that already has a report cannot be sent back to review.
    pub async fn set_importance(&self, id: i64, importance: Importance) -> Result<BulletinRecord> {
        let record = self.get_bulletin(id).await?;

        if importance == Importance::Pending && record.report_generated {
            return Err(AppError::Validation(format!(
                "record {} already has a report and cannot return to {}",
                id, importance
            )));
        }

        sqlx::query("UPDATE bulletins SET importance = ? WHERE id = ?")
            .bind(importance.label())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::debug!("Set importance of record {} to {}", id, importance);
        self.get_bulletin(id).await
    }

    /// Flip `report_generated` for one record.
    ///
    /// The update only lands while the record is still ungenerated and its
    /// importance label is still `expected_importance`; returns whether it did.
    pub async fn apply_generated(
        &self,
        id: i64,
        expected_importance: &str,
        report_name: &str,
        report_path: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE bulletins
            SET report_generated = 1, report_generated_at = ?, report_name = ?, report_path = ?
            WHERE id = ? AND report_generated = 0 AND importance = ?
            "#,
        )
        .bind(at)
        .bind(report_name)
        .bind(report_path)
        .bind(id)
        .bind(expected_importance)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::debug!("Marked record {} as generated ({})", id, report_name);
        }
        Ok(rows > 0)
    }

    /// Flip `report_sent` for one generated, unsent record; returns whether it did.
    pub async fn apply_sent(&self, id: i64, at: DateTime<Utc>) -> Result<bool> {
        let rows = sqlx::query(
            r#"
            UPDATE bulletins
            SET report_sent = 1, report_sent_at = ?
            WHERE id = ? AND report_generated = 1 AND report_sent = 0
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            tracing::debug!("Marked record {} as sent", id);
        }
        Ok(rows > 0)
    }

    /// Count generated reports for a titular whose record was created
    /// between `start` and `end`, both days inclusive.
    pub async fn count_generated_in_period(
        &self,
        titular: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<i64> {
        if end < start {
            return Err(AppError::Validation(format!(
                "period end {} precedes start {}",
                end, start
            )));
        }

        let from = start.and_time(chrono::NaiveTime::MIN).and_utc();
        let until = end
            .checked_add_days(Days::new(1))
            .ok_or_else(|| AppError::Validation(format!("period end {} out of range", end)))?
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();

        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM bulletins
            WHERE titular = ? AND report_generated = 1
              AND created_at >= ? AND created_at < ?
            "#,
        )
        .bind(titular)
        .bind(from)
        .bind(until)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Distinct mark names on record for a titular, alphabetically
    pub async fn list_marks_for_titular(&self, titular: &str) -> Result<Vec<String>> {
        let marks: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT mark FROM (
                SELECT COALESCE(NULLIF(TRIM(published_mark), ''), NULLIF(TRIM(custody_mark), '')) AS mark
                FROM bulletins
                WHERE titular = ?
            )
            WHERE mark IS NOT NULL
            ORDER BY mark ASC
            "#,
        )
        .bind(titular)
        .fetch_all(&self.pool)
        .await?;

        Ok(marks)
    }

    // ===== Clients =====

    /// Create or replace a client's contact profile
    pub async fn upsert_client(&self, client: &Client) -> Result<Client> {
        if client.titular.trim().is_empty() {
            return Err(AppError::Validation("titular must not be empty".to_string()));
        }

        let stored = sqlx::query_as::<_, Client>(
            r#"
            INSERT INTO clients (titular, email, phone, address, city)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(titular) DO UPDATE SET
                email = excluded.email,
                phone = excluded.phone,
                address = excluded.address,
                city = excluded.city
            RETURNING *
            "#,
        )
        .bind(client.titular.trim())
        .bind(&client.email)
        .bind(&client.phone)
        .bind(&client.address)
        .bind(&client.city)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!("Upserted client: {}", stored.titular);
        Ok(stored)
    }

    pub async fn list_clients(&self) -> Result<Vec<Client>> {
        let clients = sqlx::query_as::<_, Client>("SELECT * FROM clients ORDER BY titular ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(clients)
    }

    /// Titular to email for every client with a non-blank email
    pub async fn list_client_emails(&self) -> Result<BTreeMap<String, String>> {
        let clients = self.list_clients().await?;

        Ok(clients
            .iter()
            .filter_map(|client| {
                client
                    .contact_email()
                    .map(|email| (client.titular.clone(), email.to_string()))
            })
            .collect())
    }

    // ===== Notification log =====

    /// Latest log entry for a titular and period, preferring delivered ones
    pub async fn find_notification_log_entry(
        &self,
        titular: &str,
        period_key: &str,
    ) -> Result<Option<NotificationLogEntry>> {
        let entry = sqlx::query_as::<_, NotificationLogEntry>(
            r#"
            SELECT id, recipient, titular, period_key, sent_at, status
            FROM notification_log
            WHERE titular = ? AND period_key = ?
            ORDER BY (status = ?) DESC, sent_at DESC
            LIMIT 1
            "#,
        )
        .bind(titular)
        .bind(period_key)
        .bind(NOTICE_STATUS_SENT)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    pub async fn insert_notification_log_entry(&self, entry: &NotificationLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notification_log (id, recipient, titular, period_key, sent_at, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.recipient)
        .bind(&entry.titular)
        .bind(&entry.period_key)
        .bind(entry.sent_at)
        .bind(&entry.status)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Logged notice for {} in period {}",
            entry.titular,
            entry.period_key
        );
        Ok(())
    }

    pub async fn list_notification_log(&self, period_key: &str) -> Result<Vec<NotificationLogEntry>> {
        let entries = sqlx::query_as::<_, NotificationLogEntry>(
            r#"
            SELECT id, recipient, titular, period_key, sent_at, status
            FROM notification_log
            WHERE period_key = ?
            ORDER BY titular ASC, sent_at ASC
            "#,
        )
        .bind(period_key)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Repair the notification log schema in place
    pub async fn ensure_notification_log_schema(&self) -> Result<Vec<&'static str>> {
        ensure_notification_log_schema(&self.pool).await
    }

    /// Underlying pool, for maintenance tasks
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::schema::initialize_database;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn create_test_repo() -> Repository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize_database(&pool).await.unwrap();

        Repository::new(pool)
    }

    fn bulletin(titular: &str, order: i64, importance: &str) -> NewBulletinRecord {
        NewBulletinRecord {
            titular: titular.to_string(),
            bulletin_number: 512,
            bulletin_date: "05/03/2024".to_string(),
            order_number: order,
            applicant: None,
            agent: None,
            file_number: Some(format!("EXP-{}", order)),
            class: Some("25".to_string()),
            custody_mark: None,
            published_mark: Some(format!("MARCA {}", order)),
            importance: Some(importance.to_string()),
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_bulletin() {
        let repo = create_test_repo().await;

        let record = repo.insert_bulletin(bulletin("Acme Corp", 7, "Alta")).await.unwrap();
        assert!(!record.report_generated);
        assert!(!record.report_sent);
        assert_eq!(record.importance(), Ok(Importance::High));

        let fetched = repo.get_bulletin(record.id).await.unwrap();
        assert_eq!(fetched.titular, "Acme Corp");
        assert_eq!(fetched.published_mark.as_deref(), Some("MARCA 7"));
    }

    #[tokio::test]
    async fn test_insert_defaults_to_pending() {
        let repo = create_test_repo().await;

        let mut req = bulletin("Acme Corp", 1, "Alta");
        req.importance = None;
        let record = repo.insert_bulletin(req).await.unwrap();

        assert_eq!(record.importance(), Ok(Importance::Pending));
    }

    #[tokio::test]
    async fn test_get_missing_bulletin() {
        let repo = create_test_repo().await;

        let result = repo.get_bulletin(404).await;
        assert!(matches!(result, Err(AppError::RecordNotFound(404))));
    }

    #[tokio::test]
    async fn test_apply_generated_respects_guards() {
        let repo = create_test_repo().await;
        let record = repo.insert_bulletin(bulletin("Acme Corp", 1, "Media")).await.unwrap();

        // Stale importance expectation does not match
        let applied = repo
            .apply_generated(record.id, "Alta", "r.txt", "/tmp/r.txt", Utc::now())
            .await
            .unwrap();
        assert!(!applied);

        let applied = repo
            .apply_generated(record.id, "Media", "r.txt", "/tmp/r.txt", Utc::now())
            .await
            .unwrap();
        assert!(applied);

        // Second flip is a no-op
        let applied = repo
            .apply_generated(record.id, "Media", "r2.txt", "/tmp/r2.txt", Utc::now())
            .await
            .unwrap();
        assert!(!applied);

        let stored = repo.get_bulletin(record.id).await.unwrap();
        assert_eq!(stored.report_name.as_deref(), Some("r.txt"));
    }

    #[tokio::test]
    async fn test_apply_sent_requires_generated() {
        let repo = create_test_repo().await;
        let record = repo.insert_bulletin(bulletin("Acme Corp", 1, "Baja")).await.unwrap();

        assert!(!repo.apply_sent(record.id, Utc::now()).await.unwrap());

        repo.apply_generated(record.id, "Baja", "r.txt", "/tmp/r.txt", Utc::now())
            .await
            .unwrap();
        assert!(repo.apply_sent(record.id, Utc::now()).await.unwrap());
        assert!(!repo.apply_sent(record.id, Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_importance_cannot_reopen_generated_record() {
        let repo = create_test_repo().await;
        let record = repo.insert_bulletin(bulletin("Acme Corp", 1, "Pendiente")).await.unwrap();

        let reviewed = repo.set_importance(record.id, Importance::High).await.unwrap();
        assert_eq!(reviewed.importance_label, "Alta");

        repo.apply_generated(record.id, "Alta", "r.txt", "/tmp/r.txt", Utc::now())
            .await
            .unwrap();

        let result = repo.set_importance(record.id, Importance::Pending).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_count_generated_in_period_bounds() {
        let repo = create_test_repo().await;

        let stamps = [
            Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap(),
        ];
        for (order, stamp) in stamps.iter().enumerate() {
            let mut req = bulletin("Beta LLC", order as i64, "Alta");
            req.created_at = Some(*stamp);
            let record = repo.insert_bulletin(req).await.unwrap();
            repo.apply_generated(record.id, "Alta", "r.txt", "/tmp/r.txt", Utc::now())
                .await
                .unwrap();
        }

        let march = repo
            .count_generated_in_period(
                "Beta LLC",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(march, 2);

        let other = repo
            .count_generated_in_period(
                "Acme Corp",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(other, 0);
    }

    #[tokio::test]
    async fn test_count_ignores_ungenerated_records() {
        let repo = create_test_repo().await;
        let mut req = bulletin("Beta LLC", 1, "Alta");
        req.created_at = Some(Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
        repo.insert_bulletin(req).await.unwrap();

        let count = repo
            .count_generated_in_period(
                "Beta LLC",
                NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_list_unsent_joins_client_email() {
        let repo = create_test_repo().await;
        repo.upsert_client(&Client {
            titular: "Acme Corp".to_string(),
            email: Some("legal@acme.test".to_string()),
            phone: None,
            address: None,
            city: None,
        })
        .await
        .unwrap();

        let with_client = repo.insert_bulletin(bulletin("Acme Corp", 2, "Alta")).await.unwrap();
        let orphan = repo.insert_bulletin(bulletin("Orphan SA", 1, "Alta")).await.unwrap();
        for id in [with_client.id, orphan.id] {
            repo.apply_generated(id, "Alta", "r.txt", "/tmp/r.txt", Utc::now())
                .await
                .unwrap();
        }

        let unsent = repo.list_unsent().await.unwrap();
        assert_eq!(unsent.len(), 2);
        // Ordered by order number within the same bulletin
        assert_eq!(unsent[0].record.titular, "Orphan SA");
        assert_eq!(unsent[0].email, None);
        assert_eq!(unsent[1].email.as_deref(), Some("legal@acme.test"));
    }

    #[tokio::test]
    async fn test_client_upsert_and_emails() {
        let repo = create_test_repo().await;

        let mut client = Client {
            titular: "Beta LLC".to_string(),
            email: None,
            phone: Some("555-0100".to_string()),
            address: None,
            city: Some("Lima".to_string()),
        };
        repo.upsert_client(&client).await.unwrap();
        assert!(repo.list_client_emails().await.unwrap().is_empty());

        client.email = Some("ip@beta.test".to_string());
        repo.upsert_client(&client).await.unwrap();

        let emails = repo.list_client_emails().await.unwrap();
        assert_eq!(emails.get("Beta LLC").map(String::as_str), Some("ip@beta.test"));
        assert_eq!(repo.list_clients().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_log_lookup() {
        let repo = create_test_repo().await;

        assert!(repo
            .find_notification_log_entry("Beta LLC", "03-2024")
            .await
            .unwrap()
            .is_none());

        let entry = NotificationLogEntry::sent("ip@beta.test", "Beta LLC", "03-2024", Utc::now());
        repo.insert_notification_log_entry(&entry).await.unwrap();

        let found = repo
            .find_notification_log_entry("Beta LLC", "03-2024")
            .await
            .unwrap()
            .unwrap();
        assert!(found.is_sent());
        assert_eq!(found.recipient, "ip@beta.test");

        assert!(repo
            .find_notification_log_entry("Beta LLC", "04-2024")
            .await
            .unwrap()
            .is_none());
        assert_eq!(repo.list_notification_log("03-2024").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_notification_log_prefers_sent_entry() {
        let repo = create_test_repo().await;
        let earlier = Utc::now() - chrono::Duration::hours(2);

        let sent = NotificationLogEntry::sent("ip@beta.test", "Beta LLC", "03-2024", earlier);
        repo.insert_notification_log_entry(&sent).await.unwrap();

        let mut bounced =
            NotificationLogEntry::sent("ip@beta.test", "Beta LLC", "03-2024", Utc::now());
        bounced.status = "bounced".to_string();
        repo.insert_notification_log_entry(&bounced).await.unwrap();

        let found = repo
            .find_notification_log_entry("Beta LLC", "03-2024")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, sent.id);
        assert!(found.is_sent());
    }

    #[tokio::test]
    async fn test_list_marks_for_titular() {
        let repo = create_test_repo().await;

        repo.insert_bulletin(bulletin("Acme Corp", 2, "Alta")).await.unwrap();
        repo.insert_bulletin(bulletin("Acme Corp", 1, "Alta")).await.unwrap();
        let mut custody_only = bulletin("Acme Corp", 3, "Alta");
        custody_only.published_mark = Some("  ".to_string());
        custody_only.custody_mark = Some("ACME CLASSIC".to_string());
        repo.insert_bulletin(custody_only).await.unwrap();
        repo.insert_bulletin(bulletin("Acme Corp", 1, "Baja")).await.unwrap();

        let marks = repo.list_marks_for_titular("Acme Corp").await.unwrap();
        assert_eq!(marks, vec!["ACME CLASSIC", "MARCA 1", "MARCA 2"]);
    }
}
