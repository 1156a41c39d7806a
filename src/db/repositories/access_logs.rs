use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{format_log_time, non_empty, parse_log_time, to_i64},
    },
    models::{EntryId, LogEntry},
    monitor::{LogSource, Watermark},
};

/// A raw swipe as written by a device, used to seed and extend the log table.
#[derive(Debug, Clone)]
pub struct NewAccessLog {
    pub id: EntryId,
    pub log_time: NaiveDateTime,
    pub event_kind: String,
    pub personnel_ref: String,
    pub device_id: String,
    pub verify_mode: Option<String>,
    pub event_text: Option<String>,
    pub location: Option<String>,
}

// Devices may write `log_time` with or without a fraction, or with a `T`
// separator. Every comparison goes through the same strftime expression so
// that mixed forms order as times and hit `idx_access_logs_norm_time_id`.
const SELECT_AFTER_WATERMARK: &str = "SELECT
        l.id,
        strftime('%Y-%m-%d %H:%M:%f', l.log_time),
        l.event_kind,
        l.personnel_ref,
        COALESCE(p.last_name, ''),
        COALESCE(p.first_name, ''),
        p.photo,
        l.device_id,
        COALESCE(d.name, l.device_id),
        COALESCE(l.verify_mode, ''),
        l.event_text,
        l.location
    FROM access_logs l
    LEFT JOIN personnel p ON p.ref_no = l.personnel_ref
    LEFT JOIN devices d ON d.id = l.device_id
    WHERE strftime('%Y-%m-%d %H:%M:%f', l.log_time) > ?1
       OR (strftime('%Y-%m-%d %H:%M:%f', l.log_time) = ?1 AND l.id > ?2)
    ORDER BY strftime('%Y-%m-%d %H:%M:%f', l.log_time) ASC, l.id ASC
    LIMIT ?3";

fn row_to_entry(row: &Row) -> Result<LogEntry> {
    let log_time: String = row.get(1)?;
    let device_name: String = row.get(8)?;

    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: parse_log_time(&log_time, "log_time")?,
        event_kind: row.get(2)?,
        subject_ref: row.get(3)?,
        last_name: row.get(4)?,
        first_name: row.get(5)?,
        photo: non_empty(row.get(6)?),
        device_id: row.get(7)?,
        device_name,
        verify_mode: row.get(9)?,
        event_text: non_empty(row.get(10)?),
        location: non_empty(row.get(11)?),
    })
}

impl Database {
    /// Rows strictly after `watermark` in `(log_time, id)` order, joined with
    /// personnel and device names.
    pub async fn fetch_access_logs_after(
        &self,
        watermark: Watermark,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        self.execute(move |conn| {
            let mut stmt = conn
                .prepare_cached(SELECT_AFTER_WATERMARK)
                .context("failed to prepare access log query")?;

            let mut rows = stmt.query(params![
                format_log_time(&watermark.timestamp),
                watermark.id,
                to_i64(limit)?,
            ])?;

            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    pub async fn insert_access_log(&self, log: &NewAccessLog) -> Result<()> {
        let record = log.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO access_logs (id, log_time, event_kind, personnel_ref, device_id, verify_mode, event_text, location)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    format_log_time(&record.log_time),
                    record.event_kind,
                    record.personnel_ref,
                    record.device_id,
                    record.verify_mode,
                    record.event_text,
                    record.location,
                ],
            )
            .with_context(|| format!("failed to insert access log {}", record.id))?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_personnel(
        &self,
        ref_no: &str,
        last_name: &str,
        first_name: &str,
        photo: Option<&str>,
        mobile: Option<&str>,
    ) -> Result<()> {
        let values = (
            ref_no.to_string(),
            last_name.to_string(),
            first_name.to_string(),
            photo.map(str::to_string),
            mobile.map(str::to_string),
        );
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO personnel (ref_no, last_name, first_name, photo, mobile)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(ref_no) DO UPDATE SET
                     last_name = excluded.last_name,
                     first_name = excluded.first_name,
                     photo = excluded.photo,
                     mobile = excluded.mobile",
                params![values.0, values.1, values.2, values.3, values.4],
            )
            .context("failed to upsert personnel")?;
            Ok(())
        })
        .await
    }

    pub async fn upsert_device(&self, id: &str, name: &str) -> Result<()> {
        let (id, name) = (id.to_string(), name.to_string());
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO devices (id, name) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                params![id, name],
            )
            .context("failed to upsert device")?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LogSource for Database {
    async fn fetch_after(&self, watermark: Watermark, limit: usize) -> Result<Vec<LogEntry>> {
        self.fetch_access_logs_after(watermark, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn swipe(id: EntryId, log_time: NaiveDateTime, device_id: &str) -> NewAccessLog {
        NewAccessLog {
            id,
            log_time,
            event_kind: "IN".into(),
            personnel_ref: "P-1".into(),
            device_id: device_id.into(),
            verify_mode: Some("FP".into()),
            event_text: None,
            location: Some("  ".into()),
        }
    }

    async fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("logs.sqlite3")).unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn fetch_joins_reference_data() {
        let (_dir, db) = open().await;
        db.upsert_personnel("P-1", "Doe", "Jane", Some("p1.jpg"), None)
            .await
            .unwrap();
        db.upsert_device("D1", "North Gate").await.unwrap();
        db.insert_access_log(&swipe(1, at(8, 0, 0), "D1")).await.unwrap();
        db.insert_access_log(&swipe(2, at(8, 0, 1), "D9")).await.unwrap();

        let rows = db
            .fetch_access_logs_after(Watermark::new(at(7, 0, 0), 0), 10)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].last_name, "Doe");
        assert_eq!(rows[0].photo.as_deref(), Some("p1.jpg"));
        assert_eq!(rows[0].device_name, "North Gate");
        assert_eq!(rows[0].location, None);
        // Unknown device falls back to its id.
        assert_eq!(rows[1].device_name, "D9");
    }

    #[tokio::test]
    async fn fetch_uses_id_tie_break_and_limit() {
        let (_dir, db) = open().await;
        let t = at(9, 0, 0);
        for id in [10, 11, 12] {
            db.insert_access_log(&swipe(id, t, "D1")).await.unwrap();
        }
        db.insert_access_log(&swipe(5, at(9, 0, 1), "D1")).await.unwrap();

        let first = db
            .fetch_access_logs_after(Watermark::new(t, 10), 2)
            .await
            .unwrap();
        let ids: Vec<_> = first.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![11, 12]);

        let rest = db
            .fetch_access_logs_after(Watermark::new(t, 12), 10)
            .await
            .unwrap();
        let ids: Vec<_> = rest.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![5]);
    }

    async fn insert_raw(db: &Database, id: EntryId, log_time: &'static str) {
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO access_logs (id, log_time, personnel_ref, device_id)
                 VALUES (?1, ?2, 'P-1', 'D1')",
                params![id, log_time],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn whole_second_and_t_separated_rows_order_as_times() {
        let (_dir, db) = open().await;
        for id in [10, 11, 12] {
            insert_raw(&db, id, "2024-03-05 14:30:00").await;
        }
        insert_raw(&db, 13, "2024-03-05T14:30:01").await;
        insert_raw(&db, 14, "2024-03-05 14:30:01.500").await;

        let after_11 = db
            .fetch_access_logs_after(Watermark::new(at(14, 30, 0), 11), 10)
            .await
            .unwrap();
        let ids: Vec<_> = after_11.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![12, 13, 14]);
        assert_eq!(after_11[1].timestamp, at(14, 30, 1));

        // Once consumed, a T-separated row is not returned again.
        let mut mark = Watermark::new(at(14, 30, 0), 11);
        mark.advance(&after_11);
        let rest = db.fetch_access_logs_after(mark, 10).await.unwrap();
        assert!(rest.is_empty());
    }
}
