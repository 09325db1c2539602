//! Lock table and measurement log.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use std::time::Duration;

use super::{parse_ts, ts, SqliteStore};
use crate::error::{MnemosError, MnemosResult};
use crate::traits::{ExclusiveLock, Measurement, MeasurementLog};

#[async_trait]
impl ExclusiveLock for SqliteStore {
    async fn try_acquire(
        &self,
        key: &str,
        holder: &str,
        stale_after: Duration,
    ) -> MnemosResult<bool> {
        if stale_after.is_zero() {
            return Err(MnemosError::validation(
                "lock staleness window must be positive",
            ));
        }
        let now = Utc::now();
        let stale = chrono::Duration::from_std(stale_after)
            .map_err(|e| MnemosError::validation(e.to_string()))?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM locks WHERE key = ?1 AND acquired_at <= ?2",
            params![key, ts(now - stale)],
        )?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO locks (key, holder, acquired_at) VALUES (?1, ?2, ?3)",
            params![key, holder, ts(now)],
        )?;
        tx.commit()?;

        Ok(inserted == 1)
    }

    async fn release(&self, key: &str, holder: &str) -> MnemosResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM locks WHERE key = ?1 AND holder = ?2",
            params![key, holder],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MeasurementLog for SqliteStore {
    async fn record_measurement(&self, measurement: Measurement) -> MnemosResult<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO measurements (kind, value, unit, recorded_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                measurement.kind,
                measurement.value,
                measurement.unit,
                ts(measurement.recorded_at)
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn recent_measurements(
        &self,
        kind: &str,
        limit: usize,
    ) -> MnemosResult<Vec<Measurement>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT kind, value, unit, recorded_at FROM measurements
             WHERE kind = ?1 ORDER BY recorded_at DESC, id DESC LIMIT ?2",
        )?;
        let measurements = stmt
            .query_map(params![kind, limit as i64], |row| {
                let recorded_at: String = row.get(3)?;
                Ok(Measurement {
                    kind: row.get(0)?,
                    value: row.get(1)?,
                    unit: row.get(2)?,
                    recorded_at: parse_ts(&recorded_at),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(measurements)
    }
}
