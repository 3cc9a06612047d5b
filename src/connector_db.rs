//! Relational query connector.
//!
//! Runs the configured query on a SQLite or Postgres pool, chosen by the URL
//! scheme, and maps each row to a document: `id_column` becomes the id,
//! `content_column` the text, and the optional `updated_at_column` is copied
//! into metadata. Integer, float, boolean and date/time columns are rendered
//! as text, timestamps in RFC 3339.
//!
//! Unlike the other connectors, rows are reported one by one: a row whose
//! columns cannot be decoded is a per-row failure, and the runner keeps
//! going with the rest.
//!
//! ```toml
//! [[sources]]
//! type = "database"
//! name = "kb"
//! connection_url = "postgres://db.internal/kb"
//! credentials = { username = "reader", password = "..." }
//! query = "SELECT id, body, updated_at FROM articles WHERE published"
//! id_column = "id"
//! content_column = "body"
//! updated_at_column = "updated_at"
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{ColumnIndex, Decode, Row, Type};
use tracing::{debug, warn};
use url::Url;

use ragbox_core::models::{Metadata, SourceDocument};

use crate::config::DatabaseSource;
use crate::traits::{Connector, SourceContext};

/// One result row: a document, or why the row could not become one.
pub type RowResult = Result<SourceDocument>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    fn from_url(url: &str) -> Result<Self> {
        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or_default();
        match scheme.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => bail!(
                "unsupported connection_url scheme '{}' (expected sqlite or postgres)",
                other
            ),
        }
    }
}

pub struct DatabaseConnector {
    ctx: SourceContext,
    config: DatabaseSource,
}

impl DatabaseConnector {
    pub fn new(ctx: SourceContext, config: DatabaseSource) -> Self {
        Self { ctx, config }
    }

    /// Run the query and convert every row, keeping per-row failures.
    ///
    /// The outer error means the query itself failed (connection, syntax,
    /// permissions).
    pub async fn scan_rows(&self) -> Result<Vec<RowResult>> {
        let url = connection_url(&self.config)?;
        match Backend::from_url(&url)? {
            Backend::Sqlite => {
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .connect(&url)
                    .await
                    .with_context(|| self.connect_failed())?;
                let rows = sqlx::query(&self.config.query).fetch_all(&pool).await;
                pool.close().await;
                Ok(self.convert(rows.with_context(|| self.query_failed())?))
            }
            Backend::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect(&url)
                    .await
                    .with_context(|| self.connect_failed())?;
                let rows = sqlx::query(&self.config.query).fetch_all(&pool).await;
                pool.close().await;
                Ok(self.convert(rows.with_context(|| self.query_failed())?))
            }
        }
    }

    fn connect_failed(&self) -> String {
        format!("failed to connect for source '{}'", self.ctx.name)
    }

    fn query_failed(&self) -> String {
        format!("query failed for source '{}'", self.ctx.name)
    }

    fn convert<R: TextColumns>(&self, rows: Vec<R>) -> Vec<RowResult> {
        debug!(source = %self.ctx.name, rows = rows.len(), "database query returned");
        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                row_to_document(&self.ctx, &self.config, row)
                    .with_context(|| format!("row {}", i + 1))
            })
            .collect()
    }
}

#[async_trait]
impl Connector for DatabaseConnector {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    fn description(&self) -> &str {
        "Run a SQL query and index one document per row"
    }

    fn connector_type(&self) -> &str {
        "database"
    }

    async fn scan(&self) -> Result<Vec<SourceDocument>> {
        let mut documents = Vec::new();
        for row in self.scan_rows().await? {
            match row {
                Ok(doc) => documents.push(doc),
                Err(e) => warn!(source = %self.ctx.name, error = %format!("{:#}", e), "skipping row"),
            }
        }
        Ok(documents)
    }
}

/// The connection URL with configured credentials filled in.
fn connection_url(config: &DatabaseSource) -> Result<String> {
    let Some(creds) = &config.credentials else {
        return Ok(config.connection_url.clone());
    };

    let mut url = Url::parse(&config.connection_url).context("invalid connection_url")?;
    if url.cannot_be_a_base() || !url.has_host() {
        bail!("credentials are only supported for host-based connection URLs");
    }
    url.set_username(&creds.username)
        .map_err(|_| anyhow!("cannot set username on connection_url"))?;
    url.set_password(creds.password.as_deref())
        .map_err(|_| anyhow!("cannot set password on connection_url"))?;
    Ok(url.into())
}

/// Decode `column` as `T`, or `None` when the column type does not match.
fn decode<R, T>(row: &R, column: &str) -> Option<Option<T>>
where
    R: Row,
    for<'c> &'c str: ColumnIndex<R>,
    T: for<'r> Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(column).ok()
}

/// Rows whose columns can be read as text whatever their SQL type.
trait TextColumns: Row {
    fn text(&self, column: &str) -> Result<Option<String>>;
}

macro_rules! text_columns {
    ($row:ty) => {
        impl TextColumns for $row {
            fn text(&self, column: &str) -> Result<Option<String>> {
                if let Some(v) = decode::<_, String>(self, column) {
                    return Ok(v);
                }
                if let Some(v) = decode::<_, i64>(self, column) {
                    return Ok(v.map(|n| n.to_string()));
                }
                if let Some(v) = decode::<_, i32>(self, column) {
                    return Ok(v.map(|n| n.to_string()));
                }
                if let Some(v) = decode::<_, f64>(self, column) {
                    return Ok(v.map(|n| n.to_string()));
                }
                if let Some(v) = decode::<_, bool>(self, column) {
                    return Ok(v.map(|b| b.to_string()));
                }
                if let Some(v) = decode::<_, DateTime<Utc>>(self, column) {
                    return Ok(v.map(|t| t.to_rfc3339()));
                }
                if let Some(v) = decode::<_, NaiveDateTime>(self, column) {
                    return Ok(v.map(|t| Utc.from_utc_datetime(&t).to_rfc3339()));
                }
                if let Some(v) = decode::<_, NaiveDate>(self, column) {
                    return Ok(v.map(|d| d.to_string()));
                }
                // Surface the real reason (missing column, unsupported type).
                self.try_get::<Option<String>, _>(column)
                    .with_context(|| format!("cannot read column '{}' as text", column))
            }
        }
    };
}

text_columns!(SqliteRow);
text_columns!(PgRow);

fn row_to_document<R: TextColumns>(
    ctx: &SourceContext,
    config: &DatabaseSource,
    row: &R,
) -> Result<SourceDocument> {
    let id = row
        .text(&config.id_column)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("column '{}' is NULL or empty", config.id_column))?;
    let content = row
        .text(&config.content_column)?
        .ok_or_else(|| anyhow!("column '{}' is NULL for id '{}'", config.content_column, id))?;

    let mut metadata = Metadata::new();
    metadata.insert("row_id".to_string(), id.clone());
    if let Some(col) = &config.updated_at_column {
        if let Some(updated) = row.text(col)? {
            metadata.insert("updated_at".to_string(), updated);
        }
    }

    Ok(ctx.document(&id, content, metadata))
}
