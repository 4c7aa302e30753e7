//! SQLite-based tracker storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::TrackerStore;
use crate::models::{
    LatestPosition, Position, PositionId, StatusInfo, SyncLogEntry, Tracker, TrackerId,
    TrackerStats,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Trackers with their resumable sync checkpoint
            CREATE TABLE trackers (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                last_sync_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- GPS fixes, deduplicated by provider-assigned ID
            CREATE TABLE positions (
                id TEXT PRIMARY KEY,
                tracker_id INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                battery INTEGER,
                speed REAL,
                direction INTEGER,
                valid_signal INTEGER,
                satellites INTEGER,
                gsm INTEGER,
                type TEXT,
                last_message TEXT,
                date_server TEXT,
                date_tracker TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (tracker_id) REFERENCES trackers(id)
            );

            CREATE INDEX idx_positions_tracker_timestamp
                ON positions(tracker_id, timestamp);

            -- Append-only operation log
            -- No foreign key: a failed lookup of an unknown tracker is still logged
            CREATE TABLE sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tracker_id INTEGER,
                sync_time TEXT NOT NULL,
                positions_fetched INTEGER NOT NULL DEFAULT 0,
                start_date TEXT,
                end_date TEXT,
                success INTEGER NOT NULL,
                error_message TEXT,
                duration_ms INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_sync_log_sync_time ON sync_log(sync_time DESC);
            "#,
        ),
    ])
}

/// Columns selected for a position, in the order `position_from_row` reads them
const POSITION_COLUMNS: &str = "p.id, p.tracker_id, p.timestamp, p.latitude, p.longitude,
    p.battery, p.speed, p.direction, p.valid_signal, p.satellites, p.gsm, p.type,
    p.last_message, p.date_server, p.date_tracker";

const SYNC_LOG_COLUMNS: &str = "id, tracker_id, sync_time, positions_fetched, start_date,
    end_date, success, error_message, duration_ms";

/// Format a timestamp for storage
///
/// Fixed-width UTC with nanosecond precision, so lexicographic order in
/// SQL matches chronological order and a stored value reads back unchanged.
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    parse_ts(idx, &value)
}

fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(idx)?;
    value.map(|v| parse_ts(idx, &v)).transpose()
}

fn position_from_row(row: &Row<'_>) -> rusqlite::Result<Position> {
    Ok(Position {
        id: PositionId::new(row.get::<_, String>(0)?),
        tracker_id: TrackerId::new(row.get(1)?),
        timestamp: get_ts(row, 2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        battery: row.get(5)?,
        speed: row.get(6)?,
        direction: row.get(7)?,
        valid_signal: row.get(8)?,
        satellites: row.get(9)?,
        gsm: row.get(10)?,
        kind: row.get(11)?,
        last_message: get_opt_ts(row, 12)?,
        date_server: get_opt_ts(row, 13)?,
        date_tracker: get_opt_ts(row, 14)?,
    })
}

fn tracker_from_row(row: &Row<'_>) -> rusqlite::Result<Tracker> {
    Ok(Tracker {
        id: TrackerId::new(row.get(0)?),
        name: row.get(1)?,
        last_sync_at: get_opt_ts(row, 2)?,
        created_at: get_ts(row, 3)?,
        updated_at: get_ts(row, 4)?,
    })
}

fn sync_log_from_row(row: &Row<'_>) -> rusqlite::Result<SyncLogEntry> {
    Ok(SyncLogEntry {
        id: Some(row.get(0)?),
        tracker_id: row.get::<_, Option<i64>>(1)?.map(TrackerId::new),
        sync_time: get_ts(row, 2)?,
        positions_fetched: row.get::<_, i64>(3)? as usize,
        start_date: get_opt_ts(row, 4)?,
        end_date: get_opt_ts(row, 5)?,
        success: row.get(6)?,
        error_message: row.get(7)?,
        duration_ms: row.get::<_, i64>(8)? as u64,
    })
}

/// Insert one position with the first-write-wins conflict rule
fn insert_position_row(conn: &Connection, position: &Position, created_at: &str) -> Result<bool> {
    let changed = conn
        .prepare_cached(
            "INSERT INTO positions
             (id, tracker_id, timestamp, latitude, longitude,
              battery, speed, direction, valid_signal, satellites,
              gsm, type, last_message, date_server, date_tracker, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )?
        .execute(params![
            position.id.as_str(),
            position.tracker_id.as_i64(),
            format_ts(position.timestamp),
            position.latitude,
            position.longitude,
            position.battery,
            position.speed,
            position.direction,
            position.valid_signal,
            position.satellites,
            position.gsm,
            position.kind,
            position.last_message.map(format_ts),
            position.date_server.map(format_ts),
            position.date_tracker.map(format_ts),
            created_at,
        ])
        .with_context(|| format!("Failed to insert position {}", position.id.as_str()))?;

    Ok(changed > 0)
}

/// SQLite-based tracker storage
///
/// Runs in WAL mode so status queries from other processes can read while
/// a sync is writing.
pub struct SqliteTrackerStore {
    conn: Mutex<Connection>,
}

impl SqliteTrackerStore {
    /// Open (or create) the database at `db_path` and apply migrations
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets readers proceed during writes; NORMAL sync is safe with WAL
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }
}

impl TrackerStore for SqliteTrackerStore {
    fn upsert_tracker(&self, id: TrackerId, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let now = format_ts(Utc::now());

        conn.execute(
            "INSERT INTO trackers (id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at",
            params![id.as_i64(), name, now],
        )
        .with_context(|| format!("Failed to upsert tracker {id}"))?;

        Ok(())
    }

    fn get_tracker(&self, id: TrackerId) -> Result<Option<Tracker>> {
        let conn = self.conn()?;

        let tracker = conn
            .query_row(
                "SELECT id, name, last_sync_at, created_at, updated_at
                 FROM trackers WHERE id = ?",
                [id.as_i64()],
                tracker_from_row,
            )
            .optional()?;

        Ok(tracker)
    }

    fn list_trackers(&self) -> Result<Vec<Tracker>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, name, last_sync_at, created_at, updated_at
             FROM trackers ORDER BY name, id",
        )?;

        let trackers = stmt
            .query_map([], tracker_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(trackers)
    }

    fn set_checkpoint(&self, id: TrackerId, checkpoint: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;

        let changed = conn
            .execute(
                "UPDATE trackers SET last_sync_at = ?, updated_at = ? WHERE id = ?",
                params![format_ts(checkpoint), format_ts(Utc::now()), id.as_i64()],
            )
            .with_context(|| format!("Failed to update checkpoint for tracker {id}"))?;

        if changed == 0 {
            return Err(anyhow!("tracker {id} does not exist"));
        }
        Ok(())
    }

    fn insert_position(&self, position: &Position) -> Result<bool> {
        let conn = self.conn()?;
        insert_position_row(&conn, position, &format_ts(Utc::now()))
    }

    fn insert_positions(&self, positions: &[Position]) -> Result<usize> {
        if positions.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let created_at = format_ts(Utc::now());

        let mut inserted = 0;
        for position in positions {
            if insert_position_row(&tx, position, &created_at)? {
                inserted += 1;
            }
        }

        tx.commit().context("Failed to commit position batch")?;
        Ok(inserted)
    }

    fn get_position(&self, id: &str) -> Result<Option<Position>> {
        let conn = self.conn()?;

        let position = conn
            .query_row(
                &format!("SELECT {POSITION_COLUMNS} FROM positions p WHERE p.id = ?"),
                [id],
                position_from_row,
            )
            .optional()?;

        Ok(position)
    }

    fn get_positions(
        &self,
        tracker_id: TrackerId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Position>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS} FROM positions p
             WHERE p.tracker_id = ? AND p.timestamp >= ? AND p.timestamp < ?
             ORDER BY p.timestamp ASC"
        ))?;

        let positions = stmt
            .query_map(
                params![tracker_id.as_i64(), format_ts(start), format_ts(end)],
                position_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(positions)
    }

    fn latest_positions(&self) -> Result<Vec<LatestPosition>> {
        let conn = self.conn()?;

        // SQLite takes bare columns from the row holding the MAX()
        let mut stmt = conn.prepare(&format!(
            "SELECT {POSITION_COLUMNS}, t.name, MAX(p.timestamp)
             FROM positions p
             INNER JOIN trackers t ON t.id = p.tracker_id
             GROUP BY p.tracker_id
             ORDER BY t.name, t.id"
        ))?;

        let latest = stmt
            .query_map([], |row| {
                Ok(LatestPosition {
                    position: position_from_row(row)?,
                    tracker_name: row.get(15)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(latest)
    }

    fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<i64> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO sync_log
             (tracker_id, sync_time, positions_fetched, start_date, end_date,
              success, error_message, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.tracker_id.map(|id| id.as_i64()),
                format_ts(entry.sync_time),
                entry.positions_fetched as i64,
                entry.start_date.map(format_ts),
                entry.end_date.map(format_ts),
                entry.success,
                entry.error_message,
                i64::try_from(entry.duration_ms).unwrap_or(i64::MAX),
            ],
        )
        .context("Failed to append sync log entry")?;

        Ok(conn.last_insert_rowid())
    }

    fn recent_sync_logs(&self, limit: usize) -> Result<Vec<SyncLogEntry>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {SYNC_LOG_COLUMNS} FROM sync_log
             ORDER BY sync_time DESC, id DESC
             LIMIT ?"
        ))?;

        let entries = stmt
            .query_map([limit as i64], sync_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    fn get_status(&self) -> Result<StatusInfo> {
        let last_sync = self.recent_sync_logs(1)?.into_iter().next();

        let conn = self.conn()?;
        let tracker_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM trackers", [], |row| row.get(0))?;
        let position_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))?;

        Ok(StatusInfo {
            tracker_count: tracker_count as usize,
            position_count: position_count as usize,
            last_sync,
        })
    }

    fn get_stats(&self, tracker_id: Option<TrackerId>) -> Result<Vec<TrackerStats>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, COUNT(p.id), MIN(p.timestamp), MAX(p.timestamp),
                    t.last_sync_at
             FROM trackers t
             LEFT JOIN positions p ON t.id = p.tracker_id
             WHERE ?1 IS NULL OR t.id = ?1
             GROUP BY t.id
             ORDER BY t.name, t.id",
        )?;

        let stats = stmt
            .query_map([tracker_id.map(|id| id.as_i64())], |row| {
                Ok(TrackerStats {
                    tracker_id: TrackerId::new(row.get(0)?),
                    tracker_name: row.get(1)?,
                    position_count: row.get::<_, i64>(2)? as usize,
                    first_position: get_opt_ts(row, 3)?,
                    last_position: get_opt_ts(row, 4)?,
                    last_sync: get_opt_ts(row, 5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }
}
