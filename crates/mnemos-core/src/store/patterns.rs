//! PatternStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;
use uuid::Uuid;
use zerocopy::IntoBytes;

use super::{conversion_error, parse_ts, ts, SqliteStore};
use crate::error::{MnemosError, MnemosResult};
use crate::retrieval::cosine_similarity;
use crate::traits::{PatternStore, RetrievalLogEntry};
use crate::types::{
    reinforce_confidence, NewPattern, Pattern, PatternKind, PatternObservation, PatternStatus,
    ScoredPattern, SignalStrength, TurnRole,
};

const PATTERN_COLUMNS: &str = "id, content, kind, confidence, strength, status, canonical_hash, \
     embedding, expires_at, source_type, source_id, created_at, updated_at, last_seen_at";

/// An alias row, exposed for inspection.
#[derive(Debug, Clone)]
pub struct AliasRecord {
    pub pattern_id: String,
    pub alias: String,
}

/// A stored observation, exposed for inspection.
#[derive(Debug, Clone)]
pub struct ObservationRecord {
    pub pattern_id: String,
    pub evidence_turn_ids: Vec<i64>,
    pub evidence_roles: Vec<TurnRole>,
    pub confidence: f32,
    pub signal: SignalStrength,
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.as_bytes().to_vec()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

fn row_to_pattern(row: &Row<'_>) -> rusqlite::Result<Pattern> {
    let kind_str: String = row.get(2)?;
    let kind = PatternKind::from_str(&kind_str)
        .map_err(|_| conversion_error(2, format!("unknown pattern kind '{}'", kind_str)))?;
    let status_str: String = row.get(5)?;
    let status = PatternStatus::from_str(&status_str)
        .map_err(|_| conversion_error(5, format!("unknown pattern status '{}'", status_str)))?;
    let embedding: Option<Vec<u8>> = row.get(7)?;
    let expires_at: Option<String> = row.get(8)?;
    let created_at: String = row.get(11)?;
    let updated_at: String = row.get(12)?;
    let last_seen_at: String = row.get(13)?;

    Ok(Pattern {
        id: row.get(0)?,
        content: row.get(1)?,
        kind,
        confidence: row.get(3)?,
        strength: row.get(4)?,
        status,
        canonical_hash: row.get(6)?,
        embedding: embedding.as_deref().map(blob_to_embedding),
        expires_at: expires_at.as_deref().map(parse_ts),
        source_type: row.get(9)?,
        source_id: row.get(10)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        last_seen_at: parse_ts(&last_seen_at),
    })
}

impl SqliteStore {
    fn load_pattern(&self, id: &str) -> MnemosResult<Option<Pattern>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM patterns WHERE id = ?1", PATTERN_COLUMNS);
        let pattern = conn
            .query_row(&sql, params![id], row_to_pattern)
            .optional()?;
        Ok(pattern)
    }

    /// All aliases recorded against `pattern_id`.
    pub fn aliases(&self, pattern_id: &str) -> MnemosResult<Vec<AliasRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pattern_id, alias FROM pattern_aliases WHERE pattern_id = ?1 ORDER BY id",
        )?;
        let aliases = stmt
            .query_map(params![pattern_id], |row| {
                Ok(AliasRecord {
                    pattern_id: row.get(0)?,
                    alias: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(aliases)
    }

    /// All observations recorded against `pattern_id`, oldest first.
    pub fn observations(&self, pattern_id: &str) -> MnemosResult<Vec<ObservationRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pattern_id, evidence_turn_ids, evidence_roles, confidence, signal
             FROM pattern_observations WHERE pattern_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![pattern_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f32>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(pattern_id, ids, roles, confidence, signal)| {
                Ok(ObservationRecord {
                    pattern_id,
                    evidence_turn_ids: serde_json::from_str(&ids)?,
                    evidence_roles: serde_json::from_str(&roles)?,
                    confidence,
                    signal: SignalStrength::from_str(&signal)
                        .map_err(|_| MnemosError::parse(format!("unknown signal '{}'", signal)))?,
                })
            })
            .collect()
    }

    /// Every pattern regardless of status, oldest first.
    pub fn all_patterns(&self) -> MnemosResult<Vec<Pattern>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM patterns ORDER BY created_at, id", PATTERN_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let patterns = stmt
            .query_map([], row_to_pattern)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    /// Entry links recorded against `pattern_id` as `(entry_type, entry_id)`.
    pub fn entry_links(&self, pattern_id: &str) -> MnemosResult<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entry_type, entry_id FROM pattern_entry_links WHERE pattern_id = ?1 ORDER BY created_at",
        )?;
        let links = stmt
            .query_map(params![pattern_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Number of retrieval log rows.
    pub fn retrieval_log_count(&self) -> MnemosResult<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM retrieval_log", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl PatternStore for SqliteStore {
    async fn find_active_by_hash(
        &self,
        hash: &str,
        now: DateTime<Utc>,
    ) -> MnemosResult<Option<Pattern>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM patterns WHERE canonical_hash = ?1 AND status = 'active'
             AND (expires_at IS NULL OR expires_at > ?2) ORDER BY created_at LIMIT 1",
            PATTERN_COLUMNS
        );
        let pattern = conn
            .query_row(&sql, params![hash, ts(now)], row_to_pattern)
            .optional()?;
        Ok(pattern)
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        limit: usize,
        min_similarity: f32,
        now: DateTime<Utc>,
    ) -> MnemosResult<Vec<ScoredPattern>> {
        let candidates = {
            let conn = self.conn()?;
            let sql = format!(
                "SELECT {} FROM patterns WHERE status = 'active' AND embedding IS NOT NULL
                 AND (expires_at IS NULL OR expires_at > ?1)",
                PATTERN_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![ts(now)], row_to_pattern)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        let mut scored: Vec<ScoredPattern> = candidates
            .into_iter()
            .filter_map(|pattern| {
                let similarity = pattern
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(embedding, e))?;
                (similarity >= min_similarity).then_some(ScoredPattern {
                    pattern,
                    similarity,
                })
            })
            .collect();

        scored.sort_by_key(|s| std::cmp::Reverse(OrderedFloat(s.similarity)));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn insert(&self, pattern: NewPattern) -> MnemosResult<Pattern> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT INTO patterns (id, content, kind, confidence, strength, status, canonical_hash,
                    embedding, expires_at, source_type, source_id, created_at, updated_at, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4, 1, 'active', ?5, ?6, ?7, ?8, ?9, ?10, ?10, ?10)",
                params![
                    id,
                    pattern.content,
                    pattern.kind.to_string(),
                    pattern.confidence.clamp(0.0, 1.0),
                    pattern.canonical_hash,
                    pattern.embedding.as_deref().map(embedding_to_blob),
                    pattern.expires_at.map(ts),
                    pattern.source_type,
                    pattern.source_id,
                    ts(now),
                ],
            )?;
        }

        self.load_pattern(&id)?
            .ok_or_else(|| MnemosError::Internal(format!("pattern {} vanished after insert", id)))
    }

    async fn get(&self, id: &str) -> MnemosResult<Option<Pattern>> {
        self.load_pattern(id)
    }

    async fn reinforce(&self, id: &str, boost: f32) -> MnemosResult<Pattern> {
        let current = self
            .load_pattern(id)?
            .ok_or_else(|| MnemosError::not_found(id))?;
        let confidence = reinforce_confidence(current.confidence, boost);
        let now = ts(Utc::now());
        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE patterns SET confidence = ?1, strength = strength + 1,
                    last_seen_at = ?2, updated_at = ?2 WHERE id = ?3",
                params![confidence, now, id],
            )?;
        }
        self.load_pattern(id)?
            .ok_or_else(|| MnemosError::not_found(id))
    }

    async fn add_alias(&self, id: &str, alias: &str) -> MnemosResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO pattern_aliases (pattern_id, alias, created_at) VALUES (?1, ?2, ?3)",
            params![id, alias, ts(Utc::now())],
        )?;
        Ok(())
    }

    async fn update_status(&self, id: &str, status: PatternStatus) -> MnemosResult<()> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE patterns SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_string(), ts(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(MnemosError::not_found(id));
        }
        Ok(())
    }

    async fn insert_observation(&self, observation: PatternObservation) -> MnemosResult<()> {
        let ids = serde_json::to_string(&observation.turn_ids())?;
        let roles: Vec<TurnRole> = observation.evidence.iter().map(|e| e.role).collect();
        let roles = serde_json::to_string(&roles)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pattern_observations (pattern_id, evidence_turn_ids, evidence_roles,
                confidence, signal, source_type, source_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                observation.pattern_id,
                ids,
                roles,
                observation.confidence,
                observation.signal.to_string(),
                observation.source_type,
                observation.source_id,
                ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    async fn link_entry(
        &self,
        pattern_id: &str,
        entry_type: &str,
        entry_id: &str,
    ) -> MnemosResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO pattern_entry_links (pattern_id, entry_type, entry_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![pattern_id, entry_type, entry_id, ts(Utc::now())],
        )?;
        Ok(())
    }

    async fn top_patterns(&self, limit: usize) -> MnemosResult<Vec<Pattern>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM patterns WHERE status = 'active' AND (expires_at IS NULL OR expires_at > ?1)
             ORDER BY confidence DESC, strength DESC, last_seen_at DESC LIMIT ?2",
            PATTERN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let patterns = stmt
            .query_map(params![ts(Utc::now()), limit as i64], row_to_pattern)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(patterns)
    }

    async fn count_stale_events(&self, now: DateTime<Utc>) -> MnemosResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM patterns WHERE kind = 'event' AND status = 'active'
             AND expires_at IS NOT NULL AND expires_at <= ?1",
            params![ts(now)],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn log_retrieval(&self, entry: RetrievalLogEntry) -> MnemosResult<()> {
        let ids = serde_json::to_string(&entry.pattern_ids)?;
        let scores = serde_json::to_string(&entry.scores)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO retrieval_log (query, pattern_ids, scores, degraded, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![entry.query, ids, scores, entry.degraded, ts(entry.created_at)],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Evidence;
    use chrono::Duration;

    fn new_pattern(content: &str, hash: &str, embedding: Option<Vec<f32>>) -> NewPattern {
        NewPattern {
            content: content.to_string(),
            kind: PatternKind::Preference,
            confidence: 0.6,
            canonical_hash: hash.to_string(),
            embedding,
            expires_at: None,
            source_type: "test".to_string(),
            source_id: None,
        }
    }

    #[tokio::test]
    async fn test_insert_and_hash_lookup() {
        let store = SqliteStore::in_memory().unwrap();
        let inserted = store
            .insert(new_pattern("likes tea", "h1", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(inserted.strength, 1);
        assert_eq!(inserted.status, PatternStatus::Active);
        assert_eq!(inserted.embedding.as_deref(), Some(&[1.0, 0.0][..]));

        let found = store.find_active_by_hash("h1", Utc::now()).await.unwrap();
        assert_eq!(found.unwrap().id, inserted.id);

        store
            .update_status(&inserted.id, PatternStatus::Superseded)
            .await
            .unwrap();
        assert!(store
            .find_active_by_hash("h1", Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_patterns_are_excluded_and_counted() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();
        let mut event = new_pattern("dentist on friday", "h-event", Some(vec![0.0, 1.0]));
        event.kind = PatternKind::Event;
        event.expires_at = Some(now + Duration::days(14));
        store.insert(event).await.unwrap();

        let later = now + Duration::days(15);
        assert!(store.find_active_by_hash("h-event", now).await.unwrap().is_some());
        assert!(store.find_active_by_hash("h-event", later).await.unwrap().is_none());
        assert!(store
            .search_similar(&[0.0, 1.0], 5, 0.5, later)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count_stale_events(now).await.unwrap(), 0);
        assert_eq!(store.count_stale_events(later).await.unwrap(), 1);
        assert_eq!(store.all_patterns().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_search_similar_orders_and_filters() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert(new_pattern("a", "ha", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        store
            .insert(new_pattern("b", "hb", Some(vec![0.8, 0.6])))
            .await
            .unwrap();
        store
            .insert(new_pattern("c", "hc", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        store.insert(new_pattern("d", "hd", None)).await.unwrap();

        let results = store
            .search_similar(&[1.0, 0.0], 10, 0.5, Utc::now())
            .await
            .unwrap();
        let contents: Vec<_> = results.iter().map(|r| r.pattern.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b"]);
        assert!((results[1].similarity - 0.8).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_reinforce_alias_and_observation() {
        let store = SqliteStore::in_memory().unwrap();
        let p = store.insert(new_pattern("likes tea", "h1", None)).await.unwrap();

        let updated = store.reinforce(&p.id, 0.8).await.unwrap();
        assert_eq!(updated.strength, 2);
        assert!((updated.confidence - 0.76).abs() < 1e-5);

        store.add_alias(&p.id, "enjoys tea").await.unwrap();
        store.add_alias(&p.id, "enjoys tea").await.unwrap();
        assert_eq!(store.aliases(&p.id).unwrap().len(), 1);

        store
            .insert_observation(PatternObservation {
                pattern_id: p.id.clone(),
                evidence: vec![Evidence { turn_id: 4, role: TurnRole::User }],
                confidence: 0.4,
                signal: SignalStrength::Implicit,
                source_type: "compaction".to_string(),
                source_id: None,
            })
            .await
            .unwrap();
        let observations = store.observations(&p.id).unwrap();
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].evidence_turn_ids, vec![4]);
        assert_eq!(observations[0].evidence_roles, vec![TurnRole::User]);
        assert_eq!(observations[0].signal, SignalStrength::Implicit);
    }

    #[tokio::test]
    async fn test_reinforce_missing_pattern() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.reinforce("nope", 0.5).await,
            Err(MnemosError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_top_patterns_and_links() {
        let store = SqliteStore::in_memory().unwrap();
        let mut low = new_pattern("low", "hl", None);
        low.confidence = 0.2;
        let mut high = new_pattern("high", "hh", None);
        high.confidence = 0.9;
        store.insert(low).await.unwrap();
        let high = store.insert(high).await.unwrap();

        let top = store.top_patterns(1).await.unwrap();
        assert_eq!(top[0].content, "high");

        store.link_entry(&high.id, "measurement", "7").await.unwrap();
        store.link_entry(&high.id, "measurement", "7").await.unwrap();
        assert_eq!(
            store.entry_links(&high.id).unwrap(),
            vec![("measurement".to_string(), "7".to_string())]
        );
    }

    #[tokio::test]
    async fn test_log_retrieval() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .log_retrieval(RetrievalLogEntry {
                query: "tea".to_string(),
                pattern_ids: vec!["p1".to_string()],
                scores: vec![0.7],
                degraded: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert_eq!(store.retrieval_log_count().unwrap(), 1);
    }
}
