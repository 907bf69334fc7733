use sqlx::PgPool;
use sqlx::Row;

use crate::StoreError;

/// A dispatch attempt, written once at response end and mutated once by the
/// finalization worker. Only the fields the dispatch core and worker touch.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub request_id: String,
    pub canonical_model: String,
    pub used_provider: Option<String>,
    pub used_model: Option<String>,
    pub streamed: bool,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub reasoning_tokens: Option<u32>,
    pub cached_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    /// Character counts of the prompt/completion text, kept instead of the
    /// content itself so the finalization worker can estimate missing token
    /// counts without the gateway ever persisting full prompt text.
    pub prompt_chars: Option<u32>,
    pub completion_chars: Option<u32>,
    pub input_cost: Option<f64>,
    pub output_cost: Option<f64>,
    pub cached_input_cost: Option<f64>,
    pub cost: Option<f64>,
    pub finish_reason: Option<String>,
    pub error_kind: Option<String>,
    pub created_at: i64,
    pub finalized_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizedUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub reasoning_tokens: u32,
    pub cached_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FinalizedCost {
    pub input_cost: f64,
    pub output_cost: f64,
    pub cached_input_cost: f64,
    pub total: f64,
}

pub(crate) async fn insert(pool: &PgPool, record: &LogRecord) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO log_records (
            request_id, canonical_model, used_provider, used_model, streamed,
            prompt_tokens, completion_tokens, reasoning_tokens, cached_tokens, total_tokens,
            prompt_chars, completion_chars,
            finish_reason, error_kind, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
        ON CONFLICT (request_id) DO NOTHING",
    )
    .bind(&record.request_id)
    .bind(&record.canonical_model)
    .bind(&record.used_provider)
    .bind(&record.used_model)
    .bind(record.streamed)
    .bind(record.prompt_tokens.map(|v| v as i64))
    .bind(record.completion_tokens.map(|v| v as i64))
    .bind(record.reasoning_tokens.map(|v| v as i64))
    .bind(record.cached_tokens.map(|v| v as i64))
    .bind(record.total_tokens.map(|v| v as i64))
    .bind(record.prompt_chars.map(|v| v as i64))
    .bind(record.completion_chars.map(|v| v as i64))
    .bind(&record.finish_reason)
    .bind(&record.error_kind)
    .bind(record.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn fetch_unfinalized(pool: &PgPool, batch_size: i64) -> Result<Vec<LogRecord>, StoreError> {
    let rows = sqlx::query(
        "SELECT request_id, canonical_model, used_provider, used_model, streamed,
                prompt_tokens, completion_tokens, reasoning_tokens, cached_tokens, total_tokens,
                prompt_chars, completion_chars,
                input_cost, output_cost, cached_input_cost, cost, finish_reason, error_kind,
                created_at, finalized_at
         FROM log_records
         WHERE finalized_at IS NULL
         ORDER BY created_at
         LIMIT $1",
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| LogRecord {
            request_id: row.get("request_id"),
            canonical_model: row.get("canonical_model"),
            used_provider: row.get("used_provider"),
            used_model: row.get("used_model"),
            streamed: row.get("streamed"),
            prompt_tokens: row.get::<Option<i64>, _>("prompt_tokens").map(|v| v as u32),
            completion_tokens: row.get::<Option<i64>, _>("completion_tokens").map(|v| v as u32),
            reasoning_tokens: row.get::<Option<i64>, _>("reasoning_tokens").map(|v| v as u32),
            cached_tokens: row.get::<Option<i64>, _>("cached_tokens").map(|v| v as u32),
            total_tokens: row.get::<Option<i64>, _>("total_tokens").map(|v| v as u32),
            prompt_chars: row.get::<Option<i64>, _>("prompt_chars").map(|v| v as u32),
            completion_chars: row.get::<Option<i64>, _>("completion_chars").map(|v| v as u32),
            input_cost: row.get("input_cost"),
            output_cost: row.get("output_cost"),
            cached_input_cost: row.get("cached_input_cost"),
            cost: row.get("cost"),
            finish_reason: row.get("finish_reason"),
            error_kind: row.get("error_kind"),
            created_at: row.get("created_at"),
            finalized_at: row.get("finalized_at"),
        })
        .collect())
}

pub(crate) async fn finalize(
    pool: &PgPool,
    request_id: &str,
    usage: FinalizedUsage,
    cost: FinalizedCost,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE log_records SET
            prompt_tokens = $2, completion_tokens = $3, reasoning_tokens = $4,
            cached_tokens = $5, total_tokens = $6,
            input_cost = $7, output_cost = $8, cached_input_cost = $9, cost = $10,
            finalized_at = extract(epoch from now())::bigint
         WHERE request_id = $1",
    )
    .bind(request_id)
    .bind(usage.prompt_tokens as i64)
    .bind(usage.completion_tokens as i64)
    .bind(usage.reasoning_tokens as i64)
    .bind(usage.cached_tokens as i64)
    .bind(usage.total_tokens as i64)
    .bind(cost.input_cost)
    .bind(cost.output_cost)
    .bind(cost.cached_input_cost)
    .bind(cost.total)
    .execute(pool)
    .await?;

    Ok(())
}
