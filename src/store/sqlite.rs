use super::{Acknowledgement, ActivityFilter, ActivityStore, StoreError};
use crate::activity::{
    data_uri, parse_data_uri, sha256_hex, ActivityPayload, ActivityRecord, ActivityType,
};
use crate::db::SharedConn;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use std::sync::MutexGuard;
use uuid::Uuid;

const SELECT_ACTIVITY: &str = "SELECT
       a.id, a.student_name, a.grade, a.subject, a.type, a.details, a.score, a.timestamp,
       a.acknowledged_by, a.acknowledged_at, a.signature_mime, a.signature,
       att.file_name, att.mime_type, att.data
     FROM activities a
     LEFT JOIN activity_attachments att ON att.activity_id = a.id";

/// The single `activities` table in the workspace database.
pub struct SqliteActivityStore {
    conn: SharedConn,
}

impl SqliteActivityStore {
    pub fn new(conn: SharedConn) -> Self {
        Self { conn }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

fn insert_activity(
    conn: &Connection,
    payload: &ActivityPayload,
    submitted_at: DateTime<Utc>,
) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO activities(id, student_name, grade, subject, type, details, score, timestamp)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &payload.student_name,
            &payload.grade,
            &payload.subject,
            payload.kind.as_str(),
            &payload.details,
            payload.score,
            ts_text(submitted_at),
        ),
    )?;

    if let Some(att) = &payload.attachment {
        let bytes = att
            .decode()
            .map_err(|e| StoreError::Conflict(e.to_string()))?;
        conn.execute(
            "INSERT INTO activity_attachments(activity_id, file_name, mime_type, sha256, data)
             VALUES(?, ?, ?, ?, ?)",
            (&id, &att.file_name, &att.mime_type, sha256_hex(&bytes), &bytes),
        )?;
    }
    Ok(id)
}

fn row_to_record(r: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
    let kind_raw: String = r.get(4)?;
    let ts_raw: String = r.get(7)?;
    let ack_at_raw: Option<String> = r.get(9)?;
    let sig_mime: Option<String> = r.get(10)?;
    let sig: Option<Vec<u8>> = r.get(11)?;
    let att_mime: Option<String> = r.get(13)?;
    let att_data: Option<Vec<u8>> = r.get(14)?;

    let kind = ActivityType::parse(&kind_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown activity type {}", kind_raw).into(),
        )
    })?;
    let timestamp = parse_ts(&ts_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            format!("bad timestamp {}", ts_raw).into(),
        )
    })?;

    Ok(ActivityRecord {
        id: r.get(0)?,
        student_name: r.get(1)?,
        grade: r.get(2)?,
        subject: r.get(3)?,
        kind,
        details: r.get(5)?,
        score: r.get(6)?,
        attachment_name: r.get(12)?,
        attachment_url: match (&att_mime, &att_data) {
            (Some(m), Some(d)) => Some(data_uri(m, d)),
            _ => None,
        },
        attachment_type: att_mime,
        timestamp,
        acknowledged_by: r.get(8)?,
        acknowledged_at: ack_at_raw.as_deref().and_then(parse_ts),
        signature: match (sig_mime, sig) {
            (Some(m), Some(d)) => Some(data_uri(&m, &d)),
            _ => None,
        },
    })
}

fn get_record(conn: &Connection, id: &str) -> Result<ActivityRecord, StoreError> {
    let sql = format!("{} WHERE a.id = ?", SELECT_ACTIVITY);
    conn.query_row(&sql, [id], row_to_record)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
}

impl ActivityStore for SqliteActivityStore {
    fn write(
        &self,
        payload: &ActivityPayload,
        submitted_at: DateTime<Utc>,
    ) -> Result<ActivityRecord, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let id = insert_activity(&tx, payload, submitted_at)?;
        tx.commit()?;
        get_record(&conn, &id)
    }

    fn write_batch(
        &self,
        payloads: &[ActivityPayload],
        submitted_at: DateTime<Utc>,
    ) -> Result<Vec<ActivityRecord>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(payloads.len());
        for p in payloads {
            // Dropping `tx` on the error path rolls back every row so far.
            ids.push(insert_activity(&tx, p, submitted_at)?);
        }
        tx.commit()?;
        ids.iter().map(|id| get_record(&conn, id)).collect()
    }

    fn list(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>, StoreError> {
        let conn = self.lock();
        let sql = format!(
            "{}
             WHERE (?1 IS NULL OR a.type = ?1)
               AND (?2 IS NULL OR a.student_name = ?2 COLLATE NOCASE)
             ORDER BY a.timestamp DESC, a.rowid DESC
             LIMIT ?3",
            SELECT_ACTIVITY
        );
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                (
                    filter.kind.map(|k| k.as_str()),
                    filter.student_name.as_deref(),
                    limit,
                ),
                row_to_record,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn acknowledge(
        &self,
        activity_id: &str,
        ack: &Acknowledgement,
    ) -> Result<ActivityRecord, StoreError> {
        let conn = self.lock();
        let current = get_record(&conn, activity_id)?;
        if current.kind != ActivityType::PermissionSlip {
            return Err(StoreError::Conflict(
                "only permission slips can be acknowledged".to_string(),
            ));
        }
        if current.acknowledged_by.is_some() {
            return Err(StoreError::Conflict(
                "permission slip already acknowledged".to_string(),
            ));
        }

        let (sig_mime, sig_bytes) = match ack.signature.as_deref() {
            Some(uri) => {
                let Some((mime, bytes)) = parse_data_uri(uri) else {
                    return Err(StoreError::Conflict(
                        "signature must be a base64 data URI".to_string(),
                    ));
                };
                (Some(mime), Some(bytes))
            }
            None => (None, None),
        };

        conn.execute(
            "UPDATE activities
             SET acknowledged_by = ?, acknowledged_at = ?, signature_mime = ?, signature = ?
             WHERE id = ?",
            (
                &ack.parent_name,
                ts_text(ack.at),
                sig_mime,
                sig_bytes,
                activity_id,
            ),
        )?;
        get_record(&conn, activity_id)
    }

    fn describe(&self) -> String {
        "local".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::Attachment;
    use crate::db;
    use chrono::TimeZone;

    fn store() -> SqliteActivityStore {
        SqliteActivityStore::new(db::shared(db::open_in_memory().expect("db")))
    }

    fn payload(name: &str, kind: ActivityType) -> ActivityPayload {
        ActivityPayload {
            student_name: name.to_string(),
            grade: "7".to_string(),
            subject: "Science".to_string(),
            kind,
            details: "Lab report".to_string(),
            score: None,
            attachment: None,
        }
    }

    fn at(min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, min, 0).unwrap()
    }

    #[test]
    fn feed_is_newest_first_and_filterable() {
        let s = store();
        s.write(&payload("Ada", ActivityType::Task), at(1)).expect("w1");
        s.write(&payload("Grace", ActivityType::Attendance), at(2)).expect("w2");
        s.write(&payload("ada", ActivityType::Behavior), at(3)).expect("w3");

        let all = s.list(&ActivityFilter::default()).expect("list");
        let names: Vec<_> = all.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["ada", "Grace", "Ada"]);

        let ada = s
            .list(&ActivityFilter {
                student_name: Some("ADA".to_string()),
                ..Default::default()
            })
            .expect("list");
        assert_eq!(ada.len(), 2);

        let attendance = s
            .list(&ActivityFilter {
                kind: Some(ActivityType::Attendance),
                limit: Some(5),
                ..Default::default()
            })
            .expect("list");
        assert_eq!(attendance.len(), 1);
        assert_eq!(attendance[0].timestamp, at(2));
    }

    #[test]
    fn attachment_is_stored_as_blob_and_returned_as_data_uri() {
        let s = store();
        let mut p = payload("Ada", ActivityType::FileUpload);
        p.attachment = Some(Attachment {
            file_name: "hello.txt".to_string(),
            mime_type: "text/plain".to_string(),
            data: "aGVsbG8=".to_string(),
        });
        let rec = s.write(&p, at(0)).expect("write");
        assert_eq!(rec.attachment_name.as_deref(), Some("hello.txt"));
        assert_eq!(rec.attachment_type.as_deref(), Some("text/plain"));
        assert_eq!(
            rec.attachment_url.as_deref(),
            Some("data:text/plain;base64,aGVsbG8=")
        );

        let conn = s.lock();
        let digest: String = conn
            .query_row(
                "SELECT sha256 FROM activity_attachments WHERE activity_id = ?",
                [&rec.id],
                |r| r.get(0),
            )
            .expect("digest");
        assert_eq!(digest, sha256_hex(b"hello"));
    }

    #[test]
    fn roll_call_batch_rolls_back_on_failure() {
        let s = store();
        let good = payload("Ada", ActivityType::Attendance);
        let mut bad = payload("Grace", ActivityType::Attendance);
        bad.attachment = Some(Attachment {
            file_name: "x".to_string(),
            mime_type: "text/plain".to_string(),
            data: "not base64!".to_string(),
        });

        assert!(s.write_batch(&[good.clone(), bad], at(0)).is_err());
        assert!(s.list(&ActivityFilter::default()).expect("list").is_empty());

        let recs = s
            .write_batch(&[good.clone(), payload("Grace", ActivityType::Attendance)], at(0))
            .expect("batch");
        assert_eq!(recs.len(), 2);
        assert_eq!(s.list(&ActivityFilter::default()).expect("list").len(), 2);
    }

    #[test]
    fn only_unsigned_permission_slips_can_be_acknowledged() {
        let s = store();
        let task = s.write(&payload("Ada", ActivityType::Task), at(0)).expect("task");
        let slip = s
            .write(&payload("Ada", ActivityType::PermissionSlip), at(1))
            .expect("slip");
        let ack = Acknowledgement {
            parent_name: "Anne Byron".to_string(),
            signature: Some("data:image/png;base64,iVBORw==".to_string()),
            at: at(5),
        };

        assert!(matches!(
            s.acknowledge(&task.id, &ack),
            Err(StoreError::Conflict(_))
        ));
        assert!(matches!(
            s.acknowledge("missing", &ack),
            Err(StoreError::NotFound(_))
        ));

        let signed = s.acknowledge(&slip.id, &ack).expect("ack");
        assert_eq!(signed.acknowledged_by.as_deref(), Some("Anne Byron"));
        assert_eq!(signed.acknowledged_at, Some(at(5)));
        assert_eq!(
            signed.signature.as_deref(),
            Some("data:image/png;base64,iVBORw==")
        );

        assert!(matches!(
            s.acknowledge(&slip.id, &ack),
            Err(StoreError::Conflict(_))
        ));
    }
}
