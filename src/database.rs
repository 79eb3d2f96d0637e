use crate::metrics;
use crate::records::{
    BidColumns, BlockSimResultEntry, BuilderBlockSubmissionEntry, DeliveredPayloadEntry,
    ValidatorRegistrationEntry,
};
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, Connection, Pool, Postgres, Row};
use std::time::{Duration, Instant};

/// PostgreSQL connection pool type alias.
pub type DbPool = Pool<Postgres>;

pub const DEFAULT_TABLE_PREFIX: &str = "dev";

const MAX_CONNECT_ATTEMPTS: u32 = 10;

/// Names of the audit tables for one deployment, e.g. `mainnet_payload_delivered`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub validator_registration: String,
    pub builder_block_submission: String,
    pub builder_block_sim_result: String,
    pub payload_delivered: String,
}

impl Tables {
    pub fn new(prefix: &str) -> Self {
        Self {
            validator_registration: format!("{}_validator_registration", prefix),
            builder_block_submission: format!("{}_builder_block_submission", prefix),
            builder_block_sim_result: format!("{}_builder_block_sim_result", prefix),
            payload_delivered: format!("{}_payload_delivered", prefix),
        }
    }

    /// DDL for all tables. Idempotent.
    pub fn schema(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id          bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    inserted_at timestamp NOT NULL default current_timestamp,

                    pubkey        varchar(98) NOT NULL UNIQUE,
                    fee_recipient varchar(42) NOT NULL,
                    timestamp     bigint NOT NULL,
                    gas_limit     bigint NOT NULL,
                    signature     text NOT NULL
                )",
                self.validator_registration
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    inserted_at timestamp NOT NULL default current_timestamp,
                    {},
                    payload json NOT NULL
                )",
                self.builder_block_submission, BID_COLUMNS_DDL
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    inserted_at timestamp NOT NULL default current_timestamp,

                    block_submission_id bigint references {}(id) ON DELETE CASCADE,
                    success boolean NOT NULL,
                    error   text NOT NULL
                )",
                self.builder_block_sim_result, self.builder_block_submission
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id bigint GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY,
                    inserted_at timestamp NOT NULL default current_timestamp,
                    {},
                    execution_payload     json NOT NULL,
                    bid_trace             json NOT NULL,
                    bid_trace_builder_sig text NOT NULL,
                    signed_builder_bid    json NOT NULL,
                    signed_blinded_beacon_block json NOT NULL
                )",
                self.payload_delivered, BID_COLUMNS_DDL
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_slot_idx ON {0} (slot)",
                self.builder_block_submission
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_slot_idx ON {0} (slot)",
                self.payload_delivered
            ),
        ]
    }
}

const BID_COLUMNS_DDL: &str = "
    epoch bigint NOT NULL,
    slot  bigint NOT NULL,

    builder_pubkey  text NOT NULL,
    proposer_pubkey text NOT NULL,
    proposer_fee_recipient text NOT NULL,

    parent_hash  text NOT NULL,
    block_hash   text NOT NULL,
    block_number bigint NOT NULL,
    num_tx       int NOT NULL,
    value        NUMERIC(48, 0),

    gas_used  bigint NOT NULL,
    gas_limit bigint NOT NULL";

const BID_COLUMNS: &str = "epoch, slot, builder_pubkey, proposer_pubkey, proposer_fee_recipient, \
     parent_hash, block_hash, block_number, num_tx, value, gas_used, gas_limit";

/// Connects with exponential backoff (startup races with the database
/// container are common) and makes sure the schema exists.
pub async fn connect(database_url: &str, max_connections: u32, tables: &Tables) -> Result<DbPool> {
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=MAX_CONNECT_ATTEMPTS {
        match PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
        {
            Ok(pool) => {
                log::info!(
                    "Connected to database (attempt {}/{})",
                    attempt,
                    MAX_CONNECT_ATTEMPTS
                );
                match initialize_database(&pool, tables).await {
                    Ok(()) => return Ok(pool),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(e) => {
                last_err = Some(e.into());
            }
        }
        let delay_ms = (1u64 << attempt.min(6)) * 200; // 400ms, 800ms, ... capped at 12.8s
        log::warn!(
            "DB connect/init attempt {}/{} failed. Retrying in {} ms...",
            attempt,
            MAX_CONNECT_ATTEMPTS,
            delay_ms
        );
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Unknown DB connection error")))
}

pub async fn initialize_database(pool: &DbPool, tables: &Tables) -> Result<()> {
    const MIGRATION_LOCK_ID: i64 = 0x52454C4159444253; // "RELAYDBS"

    let mut conn = pool.acquire().await?;
    let mut tx = conn.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(MIGRATION_LOCK_ID)
        .execute(tx.as_mut())
        .await
        .context("failed to acquire migration lock")?;

    for statement in tables.schema() {
        sqlx::query(&statement).execute(tx.as_mut()).await?;
    }

    tx.commit().await?;
    log::info!("Database schema ready ({})", tables.builder_block_submission);
    Ok(())
}

fn to_i64(field: &str, value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("{} {} does not fit in bigint", field, value))
}

fn observe(table: &str, start: Instant) {
    metrics::increment_db_operation(table);
    metrics::record_db_operation_duration(table, start.elapsed());
}

/// Inserts or replaces the registration for a pubkey. Older timestamps never
/// overwrite newer ones.
pub async fn save_validator_registration(
    pool: &DbPool,
    tables: &Tables,
    entry: &ValidatorRegistrationEntry,
) -> Result<()> {
    let start = Instant::now();
    sqlx::query(&format!(
        "INSERT INTO {0} (pubkey, fee_recipient, timestamp, gas_limit, signature)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (pubkey) DO UPDATE SET
            fee_recipient = EXCLUDED.fee_recipient,
            timestamp = EXCLUDED.timestamp,
            gas_limit = EXCLUDED.gas_limit,
            signature = EXCLUDED.signature
         WHERE {0}.timestamp < EXCLUDED.timestamp",
        tables.validator_registration
    ))
    .bind(&entry.pubkey)
    .bind(&entry.fee_recipient)
    .bind(to_i64("timestamp", entry.timestamp)?)
    .bind(to_i64("gas_limit", entry.gas_limit)?)
    .bind(&entry.signature)
    .execute(pool)
    .await?;
    observe(&tables.validator_registration, start);
    Ok(())
}

// Binds $1..$12 in BID_COLUMNS order
fn bind_bid<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    bid: &'q BidColumns,
) -> Result<sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>> {
    Ok(query
        .bind(to_i64("epoch", bid.epoch)?)
        .bind(to_i64("slot", bid.slot)?)
        .bind(&bid.builder_pubkey)
        .bind(&bid.proposer_pubkey)
        .bind(&bid.proposer_fee_recipient)
        .bind(&bid.parent_hash)
        .bind(&bid.block_hash)
        .bind(to_i64("block_number", bid.block_number)?)
        .bind(i32::try_from(bid.num_tx).context("num_tx does not fit in int")?)
        .bind(bid.value.to_string())
        .bind(to_i64("gas_used", bid.gas_used)?)
        .bind(to_i64("gas_limit", bid.gas_limit)?))
}

/// Returns the new row id, which sim results reference.
pub async fn save_builder_block_submission(
    pool: &DbPool,
    tables: &Tables,
    entry: &BuilderBlockSubmissionEntry,
) -> Result<i64> {
    let start = Instant::now();
    let sql = format!(
        "INSERT INTO {} ({}, payload)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::numeric, $11, $12, $13::json)
         RETURNING id",
        tables.builder_block_submission, BID_COLUMNS
    );
    let row = bind_bid(sqlx::query(&sql), &entry.bid)?
        .bind(&entry.payload)
        .fetch_one(pool)
        .await?;
    observe(&tables.builder_block_submission, start);
    Ok(row.try_get::<i64, _>("id")?)
}

pub async fn save_block_sim_result(
    pool: &DbPool,
    tables: &Tables,
    entry: &BlockSimResultEntry,
) -> Result<()> {
    let start = Instant::now();
    sqlx::query(&format!(
        "INSERT INTO {} (block_submission_id, success, error) VALUES ($1, $2, $3)",
        tables.builder_block_sim_result
    ))
    .bind(entry.block_submission_id)
    .bind(entry.success)
    .bind(&entry.error)
    .execute(pool)
    .await?;
    observe(&tables.builder_block_sim_result, start);
    Ok(())
}

pub async fn save_delivered_payload(
    pool: &DbPool,
    tables: &Tables,
    entry: &DeliveredPayloadEntry,
) -> Result<()> {
    let start = Instant::now();
    let sql = format!(
        "INSERT INTO {} ({}, execution_payload, bid_trace, bid_trace_builder_sig, signed_builder_bid, signed_blinded_beacon_block)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10::numeric, $11, $12, $13::json, $14::json, $15, $16::json, $17::json)",
        tables.payload_delivered, BID_COLUMNS
    );
    bind_bid(sqlx::query(&sql), &entry.bid)?
        .bind(&entry.execution_payload)
        .bind(&entry.bid_trace)
        .bind(&entry.bid_trace_builder_sig)
        .bind(&entry.signed_builder_bid)
        .bind(&entry.signed_blinded_beacon_block)
        .execute(pool)
        .await?;
    observe(&tables.payload_delivered, start);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_use_prefix() {
        let tables = Tables::new("holesky");
        assert_eq!(tables.validator_registration, "holesky_validator_registration");
        assert_eq!(tables.builder_block_submission, "holesky_builder_block_submission");
        assert_eq!(tables.builder_block_sim_result, "holesky_builder_block_sim_result");
        assert_eq!(tables.payload_delivered, "holesky_payload_delivered");
    }

    #[test]
    fn test_schema_orders_referenced_table_first() {
        let tables = Tables::new(DEFAULT_TABLE_PREFIX);
        let schema = tables.schema();
        let submission = schema
            .iter()
            .position(|s| s.contains("CREATE TABLE IF NOT EXISTS dev_builder_block_submission"))
            .unwrap();
        let sim = schema
            .iter()
            .position(|s| s.contains("CREATE TABLE IF NOT EXISTS dev_builder_block_sim_result"))
            .unwrap();
        assert!(submission < sim);
        assert!(schema.iter().all(|s| s.contains("IF NOT EXISTS")));
    }

    #[test]
    fn test_bid_columns_match_placeholders() {
        assert_eq!(BID_COLUMNS.split(',').count(), 12);
    }
}
