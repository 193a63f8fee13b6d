//! PostgreSQL mirror of the ticket store.
//!
//! The engine commits in memory first and mirrors here asynchronously; on
//! startup open tickets are loaded back to rebuild per-queue state.

use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use super::types::{Ticket, TicketStatus};

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id BIGINT PRIMARY KEY,
                queue_id VARCHAR(128) NOT NULL,
                business_id VARCHAR(128) NOT NULL,
                customer_id VARCHAR(128) NOT NULL,
                service_id VARCHAR(128),
                number VARCHAR(32) NOT NULL,
                position INT NOT NULL,
                status VARCHAR(16) NOT NULL,
                notes TEXT,
                created_at BIGINT NOT NULL,
                called_at BIGINT,
                served_at BIGINT,
                completed_at BIGINT,
                estimated_wait_minutes INT NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tickets_queue_status ON tickets(queue_id, status)
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tickets_business_created ON tickets(business_id, created_at)
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or update one ticket.
    pub async fn upsert_ticket(&self, ticket: &Ticket) -> Result<(), sqlx::Error> {
        Self::upsert_on(&self.pool, ticket).await
    }

    /// Upsert a batch (a renumbered waiting set) atomically.
    pub async fn upsert_tickets(&self, tickets: &[Ticket]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for ticket in tickets {
            Self::upsert_on(&mut *tx, ticket).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_on<'e, E>(executor: E, ticket: &Ticket) -> Result<(), sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO tickets (id, queue_id, business_id, customer_id, service_id, number,
                position, status, notes, created_at, called_at, served_at, completed_at,
                estimated_wait_minutes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO UPDATE SET
                position = EXCLUDED.position,
                status = EXCLUDED.status,
                notes = EXCLUDED.notes,
                called_at = EXCLUDED.called_at,
                served_at = EXCLUDED.served_at,
                completed_at = EXCLUDED.completed_at,
                estimated_wait_minutes = EXCLUDED.estimated_wait_minutes
        "#,
        )
        .bind(ticket.id as i64)
        .bind(&ticket.queue_id)
        .bind(&ticket.business_id)
        .bind(&ticket.customer_id)
        .bind(&ticket.service_id)
        .bind(&ticket.number)
        .bind(ticket.position as i32)
        .bind(ticket.status.as_str())
        .bind(&ticket.notes)
        .bind(ticket.created_at as i64)
        .bind(ticket.called_at.map(|v| v as i64))
        .bind(ticket.served_at.map(|v| v as i64))
        .bind(ticket.completed_at.map(|v| v as i64))
        .bind(ticket.estimated_wait_minutes as i32)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Non-terminal tickets for startup recovery.
    pub async fn load_open_tickets(&self) -> Result<Vec<Ticket>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, queue_id, business_id, customer_id, service_id, number, position,
                   status, notes, created_at, called_at, served_at, completed_at,
                   estimated_wait_minutes
            FROM tickets
            WHERE status IN ('WAITING', 'CALLED', 'IN_SERVICE')
            ORDER BY created_at ASC
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            let Some(status) = TicketStatus::parse(&status) else {
                continue;
            };
            tickets.push(Ticket {
                id: row.get::<i64, _>("id") as u64,
                queue_id: row.get("queue_id"),
                business_id: row.get("business_id"),
                customer_id: row.get("customer_id"),
                service_id: row.get("service_id"),
                number: row.get("number"),
                position: row.get::<i32, _>("position") as u32,
                status,
                notes: row.get("notes"),
                created_at: row.get::<i64, _>("created_at") as u64,
                called_at: row.get::<Option<i64>, _>("called_at").map(|v| v as u64),
                served_at: row.get::<Option<i64>, _>("served_at").map(|v| v as u64),
                completed_at: row.get::<Option<i64>, _>("completed_at").map(|v| v as u64),
                estimated_wait_minutes: row.get::<i32, _>("estimated_wait_minutes") as u32,
            });
        }
        Ok(tickets)
    }

    /// Highest ticket id ever issued, for id-counter resync.
    pub async fn max_ticket_id(&self) -> Result<u64, sqlx::Error> {
        let row = sqlx::query("SELECT COALESCE(MAX(id), 0) AS max_id FROM tickets")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("max_id") as u64)
    }

    /// (business_id, number) pairs issued since `since_ms`, terminal tickets
    /// included, for day-counter recovery.
    pub async fn load_day_numbers(&self, since_ms: u64) -> Result<Vec<(String, String)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT business_id, number FROM tickets WHERE created_at >= $1",
        )
        .bind(since_ms as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("business_id"), row.get("number")))
            .collect())
    }
}
