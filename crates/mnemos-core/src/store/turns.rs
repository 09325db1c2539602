//! TurnStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::str::FromStr;

use super::{conversion_error, parse_ts, ts, SqliteStore};
use crate::error::MnemosResult;
use crate::traits::TurnStore;
use crate::types::{NewTurn, Turn, TurnRole};

const TURN_COLUMNS: &str =
    "id, conversation_id, role, content, envelope_id, tool_call_id, tool_name, created_at, compacted_at";

fn row_to_turn(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let role_str: String = row.get(2)?;
    let role = TurnRole::from_str(&role_str)
        .map_err(|_| conversion_error(2, format!("unknown turn role '{}'", role_str)))?;
    let created_at: String = row.get(7)?;
    let compacted_at: Option<String> = row.get(8)?;

    Ok(Turn {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        envelope_id: row.get(4)?,
        tool_call_id: row.get(5)?,
        tool_name: row.get(6)?,
        created_at: parse_ts(&created_at),
        compacted_at: compacted_at.as_deref().map(parse_ts),
    })
}

#[async_trait]
impl TurnStore for SqliteStore {
    async fn append(&self, turn: NewTurn) -> MnemosResult<Turn> {
        let conn = self.conn()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO turns (conversation_id, role, content, envelope_id, tool_call_id, tool_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                turn.conversation_id,
                turn.role.to_string(),
                turn.content,
                turn.envelope_id,
                turn.tool_call_id,
                turn.tool_name,
                ts(now),
            ],
        )?;

        Ok(Turn {
            id: conn.last_insert_rowid(),
            conversation_id: turn.conversation_id,
            role: turn.role,
            content: turn.content,
            envelope_id: turn.envelope_id,
            tool_call_id: turn.tool_call_id,
            tool_name: turn.tool_name,
            created_at: now,
            compacted_at: None,
        })
    }

    async fn get_turns(&self, ids: &[i64]) -> MnemosResult<Vec<Turn>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM turns WHERE id IN ({}) ORDER BY id",
            TURN_COLUMNS, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let turns = stmt
            .query_map(params_from_iter(ids.iter()), row_to_turn)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(turns)
    }

    async fn uncompacted(&self, conversation_id: &str) -> MnemosResult<Vec<Turn>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM turns WHERE conversation_id = ?1 AND compacted_at IS NULL ORDER BY id",
            TURN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let turns = stmt
            .query_map(params![conversation_id], row_to_turn)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(turns)
    }

    async fn mark_compacted(&self, ids: &[i64], at: DateTime<Utc>) -> MnemosResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut marked = 0;
        {
            let mut stmt = tx.prepare(
                "UPDATE turns SET compacted_at = ?1 WHERE id = ?2 AND compacted_at IS NULL",
            )?;
            let stamp = ts(at);
            for id in ids {
                marked += stmt.execute(params![stamp, id])?;
            }
        }
        tx.commit()?;
        Ok(marked)
    }

    async fn recent(&self, conversation_id: &str, limit: usize) -> MnemosResult<Vec<Turn>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM turns WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
            TURN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut turns = stmt
            .query_map(params![conversation_id, limit as i64], row_to_turn)?
            .collect::<Result<Vec<_>, _>>()?;
        turns.reverse();
        Ok(turns)
    }

    async fn last_compaction_at(
        &self,
        conversation_id: &str,
    ) -> MnemosResult<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_compacted_at FROM compaction_state WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.as_deref().map(parse_ts))
    }

    async fn set_last_compaction(
        &self,
        conversation_id: &str,
        at: DateTime<Utc>,
    ) -> MnemosResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO compaction_state (conversation_id, last_compacted_at) VALUES (?1, ?2)
             ON CONFLICT(conversation_id) DO UPDATE SET last_compacted_at = excluded.last_compacted_at",
            params![conversation_id, ts(at)],
        )?;
        Ok(())
    }

    async fn conversations_with_pending(&self) -> MnemosResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT conversation_id FROM turns WHERE compacted_at IS NULL ORDER BY conversation_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}
