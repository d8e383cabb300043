//! Postgres-backed rule section store with pgvector similarity search.

use std::sync::Arc;

use async_trait::async_trait;
use pgvector::Vector;
use tokio_postgres::types::Json as PgJson;
use tokio_postgres::{Client, NoTls, Row};

use crate::error::StoreError;
use crate::model::{Facts, RuleSection, ScoredSection};
use crate::retrieval::VectorSearch;

const SECTION_COLUMNS: &str = "rs.id::text AS id, \
     rs.ruleset_id::text AS ruleset_id, \
     g.id::text AS game_id, \
     g.title AS game_title, \
     r.rom_version, \
     rs.section_type, \
     rs.title, \
     rs.body, \
     rs.facts, \
     rs.order_idx";

const FROM_JOINED: &str = "FROM rule_sections rs \
     JOIN rulesets r ON rs.ruleset_id = r.id \
     JOIN games g ON r.game_id = g.id";

/// Long-lived handle over the rule section tables.
///
/// Holds one shared connection; every method is a stateless query, so the
/// handle is safe to call concurrently from many requests.
#[derive(Clone)]
pub struct SectionStore {
    client: Arc<Client>,
}

impl SectionStore {
    /// Connects to Postgres and spawns the connection driver task.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "postgres connection closed");
            }
        });
        Ok(Self {
            client: Arc::new(client),
        })
    }

    /// Wraps an existing client, used by tests and pool-managing callers.
    pub fn from_client(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// Fetches one section with its provenance columns.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<RuleSection>, StoreError> {
        let sql = format!("SELECT {SECTION_COLUMNS} {FROM_JOINED} WHERE rs.id::text = $1");
        let row = self.client.query_opt(&sql, &[&id]).await?;
        row.map(|row| section_from_row(&row)).transpose()
    }

    /// Sections that still need an embedding, oldest first.
    ///
    /// With `include_embedded`, every section is returned instead; the
    /// backfill job uses that for full regeneration after body edits.
    pub async fn sections_missing_embedding(
        &self,
        include_embedded: bool,
        limit: i64,
    ) -> Result<Vec<RuleSection>, StoreError> {
        let predicate = if include_embedded {
            "TRUE"
        } else {
            "rs.embedding IS NULL"
        };
        let sql = format!(
            "SELECT {SECTION_COLUMNS} {FROM_JOINED} \
             WHERE {predicate} ORDER BY rs.created_at ASC LIMIT $1"
        );
        let rows = self.client.query(&sql, &[&limit]).await?;
        rows.iter().map(section_from_row).collect()
    }

    /// Writes a freshly computed embedding back to its section.
    pub async fn update_embedding(&self, id: &str, embedding: &[f32]) -> Result<(), StoreError> {
        let vector = Vector::from(embedding.to_vec());
        self.client
            .execute(
                "UPDATE rule_sections SET embedding = $1 WHERE id::text = $2",
                &[&vector, &id],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl VectorSearch for SectionStore {
    async fn search(
        &self,
        query: &[f32],
        game_id: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredSection>, StoreError> {
        let sql = format!(
            "SELECT {SECTION_COLUMNS}, \
                    1 - (rs.embedding <=> $1) AS similarity \
             {FROM_JOINED} \
             WHERE rs.embedding IS NOT NULL \
               AND 1 - (rs.embedding <=> $1) > $2 \
               AND ($3::text IS NULL OR g.id::text = $3) \
             ORDER BY rs.embedding <=> $1 \
             LIMIT $4"
        );
        let vector = Vector::from(query.to_vec());
        let rows = self
            .client
            .query(&sql, &[&vector, &threshold, &game_id, &(limit as i64)])
            .await?;
        rows.iter()
            .map(|row| {
                let section = section_from_row(row)?;
                let similarity: f64 = row.try_get("similarity")?;
                Ok(ScoredSection {
                    section,
                    similarity,
                })
            })
            .collect()
    }
}

fn section_from_row(row: &Row) -> Result<RuleSection, StoreError> {
    let facts: Option<PgJson<Facts>> = row.try_get("facts")?;
    Ok(RuleSection {
        id: row.try_get("id")?,
        ruleset_id: row.try_get("ruleset_id")?,
        game_id: row.try_get("game_id")?,
        game_title: row.try_get("game_title")?,
        rom_version: row.try_get("rom_version")?,
        section_type: row.try_get("section_type")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        facts: facts.map(|PgJson(facts)| facts).unwrap_or_default(),
        order_idx: row.try_get("order_idx")?,
        // Row mappers never pull vectors back out; search compares them
        // inside Postgres and the backfill only writes.
        embedding: None,
    })
}
