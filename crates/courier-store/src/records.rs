//! Read/write helpers for cached records.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};

use courier_shared::{EntityId, EntityKind, PageRequest, Record, SortField};

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    // ------------------------------------------------------------------
    // Write
    // ------------------------------------------------------------------

    /// Insert or replace a record.
    pub fn upsert_record(&self, kind: EntityKind, record: &Record) -> Result<()> {
        let id = record.id().ok_or(StoreError::MissingId)?;
        self.conn().execute(
            "INSERT INTO records
                (id, kind, parent_id, created_at, last_message_sent_at, position, payload, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                parent_id = excluded.parent_id,
                created_at = excluded.created_at,
                last_message_sent_at = excluded.last_message_sent_at,
                position = excluded.position,
                payload = excluded.payload,
                cached_at = excluded.cached_at",
            params![
                id.as_str(),
                kind.plural(),
                parent_for(kind, record).map(|p| p.to_string()),
                record.created_at().map(timestamp),
                record.last_message_sent_at().map(timestamp),
                record.position(),
                serde_json::to_string(record)?,
                timestamp(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Delete a record by id.  Returns `true` if a row was deleted.
    pub fn delete_record(&self, id: &EntityId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM records WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_record(&self, id: &EntityId) -> Result<Record> {
        self.find_record(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_record(&self, id: &EntityId) -> Result<Option<Record>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM records WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    pub fn count_records(&self, kind: EntityKind) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ?1",
            params![kind.plural()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Read one page in descending sort order, starting after `from_id`.
    ///
    /// A cursor that is no longer cached yields an empty page rather than
    /// restarting from the top, which would hand back records the caller
    /// already holds.
    pub fn load_page(&self, request: &PageRequest) -> Result<Vec<Record>> {
        let key = sort_expression(request.kind, request.sort);

        let mut sql = String::from("SELECT payload FROM records WHERE kind = ?");
        let mut args: Vec<SqlValue> = vec![SqlValue::Text(request.kind.plural().to_string())];

        if let Some(parent) = &request.parent {
            sql.push_str(" AND parent_id = ?");
            args.push(SqlValue::Text(parent.to_string()));
        }

        if let Some(cursor) = &request.from_id {
            let cursor_key: Option<SqlValue> = self
                .conn()
                .query_row(
                    &format!("SELECT {key} FROM records WHERE id = ?1"),
                    params![cursor.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(cursor_key) = cursor_key else {
                tracing::debug!(cursor = %cursor, "page cursor not cached");
                return Ok(Vec::new());
            };
            sql.push_str(&format!(" AND ({key} < ? OR ({key} = ? AND id < ?))"));
            args.push(cursor_key.clone());
            args.push(cursor_key);
            args.push(SqlValue::Text(cursor.to_string()));
        }

        sql.push_str(&format!(" ORDER BY {key} DESC, id DESC LIMIT ?"));
        args.push(SqlValue::Integer(request.page_size as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| row.get::<_, String>(0))?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row?)?);
        }
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sort_expression(kind: EntityKind, sort: Option<SortField>) -> &'static str {
    match (kind, sort) {
        (EntityKind::Message | EntityKind::Announcement, _) => "position",
        (_, Some(SortField::LastMessage)) => "COALESCE(last_message_sent_at, created_at)",
        (EntityKind::Conversation | EntityKind::Channel, _) => "created_at",
        _ => "id",
    }
}

/// Memberships store their channel; messages their conversation or channel.
fn parent_for(kind: EntityKind, record: &Record) -> Option<EntityId> {
    match kind {
        EntityKind::Message | EntityKind::Membership => record.parent_id(),
        _ => None,
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
