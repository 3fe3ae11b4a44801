//! PostgreSQL-backed vector and lexical retrieval
//!
//! Queries an already-populated index: pgvector tables (one per embedding
//! dimension) for semantic search and a tsvector column for keyword search.
//! Schema creation and ingestion live elsewhere.

use async_trait::async_trait;
use regex::Regex;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Row,
};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{LexicalRetriever, RetrievalEntry, RetrievalError, VectorRetriever};
use crate::config::IndexConfig;
use crate::embedding::Embedding;
use crate::errors::EvidenceError;

/// Vector rows fetched per requested document; several chunks may share a document.
const CHUNK_OVERSAMPLE: usize = 4;

impl From<sqlx::Error> for RetrievalError {
    fn from(e: sqlx::Error) -> Self {
        RetrievalError::Backend(e.to_string())
    }
}

/// Accept plain or schema-qualified identifiers only; these are interpolated into SQL.
fn validate_identifier(name: &str) -> Result<(), RetrievalError> {
    let re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .map_err(|e| RetrievalError::InvalidIdentifier(e.to_string()))?;
    if !re.is_match(name) {
        return Err(RetrievalError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

pub struct PostgresIndex {
    pool: PgPool,
    /// Dimension -> pre-rendered similarity query for that dimension's table
    vector_queries: BTreeMap<usize, String>,
    lexical_query: String,
    text_search_config: String,
}

impl PostgresIndex {
    /// Connect to the index database described by `config`.
    pub async fn connect(config: &IndexConfig) -> Result<Self, EvidenceError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800))
            .connect(&config.database_url)
            .await
            .map_err(|e| {
                EvidenceError::Config(format!("Failed to connect to index database: {}", e))
            })?;

        Self::from_pool(pool, config)
    }

    /// Build on an existing pool, validating every configured identifier.
    pub fn from_pool(pool: PgPool, config: &IndexConfig) -> Result<Self, EvidenceError> {
        let invalid = |e: RetrievalError| EvidenceError::Config(e.to_string());

        for column in [
            &config.document_id_column,
            &config.embedding_column,
            &config.documents_table,
            &config.documents_id_column,
            &config.text_search_column,
        ] {
            validate_identifier(column).map_err(invalid)?;
        }

        let mut vector_queries = BTreeMap::new();
        for table in &config.vector_tables {
            validate_identifier(&table.table).map_err(invalid)?;
            vector_queries.insert(
                table.dimension,
                vector_sql(&table.table, &config.document_id_column, &config.embedding_column),
            );
        }

        Ok(PostgresIndex {
            pool,
            vector_queries,
            lexical_query: lexical_sql(
                &config.documents_table,
                &config.documents_id_column,
                &config.text_search_column,
            ),
            text_search_config: config.text_search_config.clone(),
        })
    }

    /// Dimensions with a configured vector table.
    pub fn dimensions(&self) -> impl Iterator<Item = usize> + '_ {
        self.vector_queries.keys().copied()
    }
}

fn vector_sql(table: &str, document_id: &str, embedding: &str) -> String {
    format!(
        "SELECT document_id, MAX(similarity) AS similarity
         FROM (
             SELECT {document_id}::text AS document_id,
                    (1 - ({embedding} <=> $1))::float8 AS similarity
             FROM {table}
             ORDER BY {embedding} <=> $1
             LIMIT $4
         ) nearest
         WHERE similarity >= $2
         GROUP BY document_id
         ORDER BY similarity DESC, document_id ASC
         LIMIT $3"
    )
}

fn lexical_sql(documents: &str, id: &str, text_search: &str) -> String {
    format!(
        "SELECT {id}::text AS document_id,
                ts_rank_cd({text_search}, query)::float8 AS score
         FROM {documents}, plainto_tsquery($2::regconfig, $1) AS query
         WHERE {text_search} @@ query
         ORDER BY score DESC, document_id ASC
         LIMIT $3"
    )
}

#[async_trait]
impl VectorRetriever for PostgresIndex {
    async fn search(
        &self,
        embedding: &Embedding,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<RetrievalEntry>, RetrievalError> {
        let sql = self
            .vector_queries
            .get(&embedding.dimension())
            .ok_or(RetrievalError::UnsupportedDimension(embedding.dimension()))?;

        let vector = pgvector::Vector::from(embedding.as_slice().to_vec());
        let rows = sqlx::query(sql)
            .bind(vector)
            .bind(threshold as f64)
            .bind(limit as i64)
            .bind((limit * CHUNK_OVERSAMPLE) as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let document_id: String = row.try_get("document_id")?;
            let similarity: f64 = row.try_get("similarity")?;
            results.push(RetrievalEntry::new(document_id, similarity));
        }
        Ok(results)
    }
}

#[async_trait]
impl LexicalRetriever for PostgresIndex {
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalEntry>, RetrievalError> {
        let rows = sqlx::query(&self.lexical_query)
            .bind(query_text)
            .bind(self.text_search_config.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let document_id: String = row.try_get("document_id")?;
            let score: f64 = row.try_get("score")?;
            results.push(RetrievalEntry::new(document_id, score));
        }
        Ok(results)
    }
}
