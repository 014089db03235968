use std::path::Path;

use anyhow::Result;
use rusqlite::Connection;

use crate::aggregate::AggregateTable;
use crate::pipeline::{RunConfig, RunSummary};

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS awards (
            source         TEXT NOT NULL,
            award_id       TEXT NOT NULL,
            title          TEXT,
            recipient      TEXT,
            amount         REAL,
            date_announced TEXT,
            source_url     TEXT NOT NULL,
            extracted_at   TEXT NOT NULL,
            warnings       TEXT,
            created_at     TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (source, award_id)
        );
        CREATE INDEX IF NOT EXISTS idx_awards_date ON awards(date_announced);
        CREATE INDEX IF NOT EXISTS idx_awards_recipient ON awards(recipient);

        CREATE TABLE IF NOT EXISTS runs (
            id              INTEGER PRIMARY KEY,
            source          TEXT NOT NULL,
            base_url        TEXT NOT NULL,
            pages_done      INTEGER NOT NULL,
            pages_failed    INTEGER NOT NULL,
            items_done      INTEGER NOT NULL,
            items_failed    INTEGER NOT NULL,
            items_filtered  INTEGER NOT NULL,
            merge_conflicts INTEGER NOT NULL,
            aborted         TEXT,
            started_at      TEXT NOT NULL,
            finished_at     TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;
    Ok(())
}

/// Upsert every row of an aggregate table. Field warnings ride along as a
/// JSON column so a later audit can see which values were missing or odd.
pub fn save_awards(conn: &Connection, table: &AggregateTable) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut count = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO awards
             (source, award_id, title, recipient, amount, date_announced,
              source_url, extracted_at, warnings)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for record in table.rows() {
            let warning_list = table.warnings_for(&record.award_id);
            let warnings = if warning_list.is_empty() {
                None
            } else {
                Some(serde_json::to_string(warning_list)?)
            };
            count += stmt.execute(rusqlite::params![
                record.source,
                record.award_id,
                record.title,
                record.recipient,
                record.amount,
                record.date_announced.map(|d| d.to_string()),
                record.source_url,
                record.extracted_at.to_rfc3339(),
                warnings,
            ])?;
        }
    }
    tx.commit()?;
    Ok(count)
}

pub fn save_run(
    conn: &Connection,
    config: &RunConfig,
    summary: &RunSummary,
    started_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO runs
         (source, base_url, pages_done, pages_failed, items_done, items_failed,
          items_filtered, merge_conflicts, aborted, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            config.template.rules().source,
            config.base_url,
            summary.pages_done,
            summary.pages_failed,
            summary.items_done,
            summary.items_failed,
            summary.items_filtered,
            summary.merge_conflicts,
            summary.aborted,
            started_at,
        ],
    )?;
    Ok(())
}

// ── Reporting ──

pub struct DbStats {
    pub awards: usize,
    pub sources: usize,
    pub with_warnings: usize,
    pub runs: usize,
    pub last_run: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<DbStats> {
    let awards = conn.query_row("SELECT COUNT(*) FROM awards", [], |r| r.get(0))?;
    let sources =
        conn.query_row("SELECT COUNT(DISTINCT source) FROM awards", [], |r| r.get(0))?;
    let with_warnings = conn.query_row(
        "SELECT COUNT(*) FROM awards WHERE warnings IS NOT NULL",
        [],
        |r| r.get(0),
    )?;
    let runs = conn.query_row("SELECT COUNT(*) FROM runs", [], |r| r.get(0))?;
    let last_run = conn
        .query_row(
            "SELECT finished_at FROM runs ORDER BY id DESC LIMIT 1",
            [],
            |r| r.get(0),
        )
        .ok();
    Ok(DbStats {
        awards,
        sources,
        with_warnings,
        runs,
        last_run,
    })
}

pub struct AwardRow {
    pub award_id: String,
    pub title: Option<String>,
    pub recipient: Option<String>,
    pub amount: Option<f64>,
    pub date_announced: Option<String>,
    pub source: String,
}

pub fn fetch_awards(
    conn: &Connection,
    source: Option<&str>,
    limit: usize,
) -> Result<Vec<AwardRow>> {
    let sql = match source {
        Some(_) => {
            "SELECT award_id, title, recipient, amount, date_announced, source
             FROM awards WHERE source = ?1
             ORDER BY date_announced DESC, award_id LIMIT ?2"
        }
        None => {
            "SELECT award_id, title, recipient, amount, date_announced, source
             FROM awards
             ORDER BY date_announced DESC, award_id LIMIT ?1"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let map_row = |row: &rusqlite::Row| {
        Ok(AwardRow {
            award_id: row.get(0)?,
            title: row.get(1)?,
            recipient: row.get(2)?,
            amount: row.get(3)?,
            date_announced: row.get(4)?,
            source: row.get(5)?,
        })
    };
    let rows = match source {
        Some(s) => stmt
            .query_map(rusqlite::params![s, limit], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(rusqlite::params![limit], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}
