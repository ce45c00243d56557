pub mod schema;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SearchConfig;
use crate::error::{ChronicleError, Result};
use crate::search::{self, IndexFields, SearchIndex, SourceKind};
use crate::transcript::Transcript;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// An authoritative timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub timeline: String,
    pub tags: Option<String>,
    pub actor: Option<String>,
    pub audio_file: Option<String>,
    pub transcript: Option<Transcript>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating or editing an event. The identifier is
/// immutable and assigned by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub audio_file: Option<String>,
}

/// A parsed attachment owned by one event. Text extraction happens outside
/// this system; the plain text and page-break offsets arrive at this
/// boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub event_id: String,
    pub filename: String,
    pub text: String,
    pub page_count: u32,
    /// Character offset of the start of each page, ascending from 0.
    pub page_offsets: Vec<usize>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    pub filename: String,
    pub text: String,
    #[serde(default)]
    pub page_offsets: Vec<usize>,
}

impl Document {
    /// 1-based page containing the first case-insensitive occurrence of
    /// `term`, falling back to page 1 when the (possibly stemmed) term is
    /// not literal in the text.
    pub fn page_for_term(&self, term: &str) -> u32 {
        let haystack = self.text.to_lowercase();
        match haystack.find(&term.to_lowercase()) {
            Some(offset) => self.page_offsets.partition_point(|&p| p <= offset) as u32,
            None => 1,
        }
        .max(1)
    }
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Owns the SQLite database holding events, documents, and the derived FTS
/// index. Every write keeps the index in sync inline; deletes remove index
/// entries in the same transaction as the row so no orphan entry survives.
///
/// Cheaply cloneable — the connection is behind `Arc<Mutex<_>>` and is held
/// only per-statement, never across awaits.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<Mutex<Connection>>,
    index: SearchIndex,
}

impl EventStore {
    /// Open (or create) the store at `path` and run migrations.
    pub fn open(path: &Path, search_config: SearchConfig) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::run_migrations(&conn)?;
        info!(db = %path.display(), "event store ready");
        Ok(Self::from_connection(conn, search_config))
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory(search_config: SearchConfig) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::run_migrations(&conn)?;
        Ok(Self::from_connection(conn, search_config))
    }

    fn from_connection(conn: Connection, search_config: SearchConfig) -> Self {
        let db = Arc::new(Mutex::new(conn));
        let index = SearchIndex::new(db.clone(), search_config);
        Self { db, index }
    }

    /// The search index sharing this store's database.
    pub fn index(&self) -> &SearchIndex {
        &self.index
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    pub fn create_event(&self, input: EventInput) -> Result<Event> {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4().to_string(),
            title: input.title,
            description: input.description,
            timestamp: input.timestamp,
            timeline: input.timeline,
            tags: input.tags,
            actor: input.actor,
            audio_file: input.audio_file,
            transcript: None,
            created_at: now,
            updated_at: now,
        };

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        tx.execute(
            "INSERT INTO events (id, title, description, timestamp, timeline, tags, actor,
                                 audio_file, transcript, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?9)",
            rusqlite::params![
                event.id,
                event.title,
                event.description,
                event.timestamp.to_rfc3339(),
                event.timeline,
                event.tags,
                event.actor,
                event.audio_file,
                now.to_rfc3339(),
            ],
        )?;
        search::upsert_entry(
            &tx,
            &event.id,
            SourceKind::Event,
            &event.id,
            &event_fields(&event),
        )?;
        tx.commit()?;

        debug!(event_id = %event.id, timeline = %event.timeline, "event created");
        Ok(event)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, title, description, timestamp, timeline, tags, actor, audio_file,
                    transcript, created_at, updated_at
             FROM events WHERE id = ?1",
            [id],
            map_event,
        )
        .optional()
        .map_err(ChronicleError::from)
    }

    /// Events ordered by timestamp, optionally restricted to one timeline.
    pub fn list_events(&self, timeline: Option<&str>) -> Result<Vec<Event>> {
        let conn = self.db.lock();
        let mut out = Vec::new();
        match timeline {
            Some(t) => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, description, timestamp, timeline, tags, actor,
                            audio_file, transcript, created_at, updated_at
                     FROM events WHERE timeline = ?1 ORDER BY timestamp",
                )?;
                for row in stmt.query_map([t], map_event)? {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT id, title, description, timestamp, timeline, tags, actor,
                            audio_file, transcript, created_at, updated_at
                     FROM events ORDER BY timestamp",
                )?;
                for row in stmt.query_map([], map_event)? {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Distinct timeline labels in use.
    pub fn list_timelines(&self) -> Result<Vec<String>> {
        let conn = self.db.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT timeline FROM events WHERE timeline != '' ORDER BY timeline")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Mutate an event in place and refresh its index entries.
    pub fn update_event(&self, id: &str, input: EventInput) -> Result<Event> {
        let mut event = self
            .get_event(id)?
            .ok_or_else(|| ChronicleError::EventNotFound(id.to_string()))?;

        event.title = input.title;
        event.description = input.description;
        event.timestamp = input.timestamp;
        event.timeline = input.timeline;
        event.tags = input.tags;
        event.actor = input.actor;
        event.audio_file = input.audio_file;
        event.updated_at = Utc::now();

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        tx.execute(
            "UPDATE events SET title = ?2, description = ?3, timestamp = ?4, timeline = ?5,
                    tags = ?6, actor = ?7, audio_file = ?8, updated_at = ?9
             WHERE id = ?1",
            rusqlite::params![
                event.id,
                event.title,
                event.description,
                event.timestamp.to_rfc3339(),
                event.timeline,
                event.tags,
                event.actor,
                event.audio_file,
                event.updated_at.to_rfc3339(),
            ],
        )?;
        search::upsert_entry(
            &tx,
            &event.id,
            SourceKind::Event,
            &event.id,
            &event_fields(&event),
        )?;
        // Timeline or title changes must reach the transcript entry too.
        if let Some(transcript) = &event.transcript {
            search::upsert_entry(
                &tx,
                &event.id,
                SourceKind::Transcript,
                &event.id,
                &transcript_fields(&event, transcript),
            )?;
        }
        tx.commit()?;

        debug!(event_id = %event.id, "event updated");
        Ok(event)
    }

    /// Delete an event, its documents, and every derived index entry.
    /// Index entries go first, inside the same transaction, so a failure
    /// can never leave a dangling entry for a missing row.
    pub fn delete_event(&self, id: &str) -> Result<()> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        search::delete_event_entries(&tx, id)?;
        let deleted = tx.execute("DELETE FROM events WHERE id = ?1", [id])?;
        tx.commit()?;

        if deleted == 0 {
            return Err(ChronicleError::EventNotFound(id.to_string()));
        }
        debug!(event_id = id, "event deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Transcripts
    // -----------------------------------------------------------------

    /// Attach a transcript to an event. Written atomically and wholesale:
    /// re-transcription replaces the previous transcript and its index
    /// entry, never patches words.
    pub fn set_transcript(&self, event_id: &str, transcript: Transcript) -> Result<Event> {
        let mut event = self
            .get_event(event_id)?
            .ok_or_else(|| ChronicleError::EventNotFound(event_id.to_string()))?;
        event.transcript = Some(transcript);
        event.updated_at = Utc::now();

        let json = serde_json::to_string(event.transcript.as_ref().unwrap())
            .map_err(|e| ChronicleError::MalformedTranscript(e.to_string()))?;

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        tx.execute(
            "UPDATE events SET transcript = ?2, updated_at = ?3 WHERE id = ?1",
            rusqlite::params![event_id, json, event.updated_at.to_rfc3339()],
        )?;
        search::upsert_entry(
            &tx,
            event_id,
            SourceKind::Transcript,
            event_id,
            &transcript_fields(&event, event.transcript.as_ref().unwrap()),
        )?;
        tx.commit()?;

        debug!(event_id, "transcript attached");
        Ok(event)
    }

    // -----------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------

    pub fn attach_document(&self, event_id: &str, input: DocumentInput) -> Result<Document> {
        let event = self
            .get_event(event_id)?
            .ok_or_else(|| ChronicleError::EventNotFound(event_id.to_string()))?;

        let mut page_offsets = input.page_offsets;
        if page_offsets.is_empty() {
            page_offsets.push(0);
        }
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            filename: input.filename,
            text: input.text,
            page_count: page_offsets.len() as u32,
            page_offsets,
            created_at: Utc::now(),
        };

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        tx.execute(
            "INSERT INTO documents (id, event_id, filename, text, page_count, page_offsets, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                doc.id,
                doc.event_id,
                doc.filename,
                doc.text,
                doc.page_count,
                serde_json::to_string(&doc.page_offsets).unwrap_or_else(|_| "[0]".into()),
                doc.created_at.to_rfc3339(),
            ],
        )?;
        search::upsert_entry(
            &tx,
            &doc.id,
            SourceKind::Document,
            event_id,
            &IndexFields {
                title: doc.filename.clone(),
                body: doc.text.clone(),
                timeline: event.timeline.clone(),
            },
        )?;
        tx.commit()?;

        debug!(event_id, document_id = %doc.id, "document attached");
        Ok(doc)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.db.lock();
        conn.query_row(
            "SELECT id, event_id, filename, text, page_count, page_offsets, created_at
             FROM documents WHERE id = ?1",
            [id],
            map_document,
        )
        .optional()
        .map_err(ChronicleError::from)
    }

    pub fn delete_document(&self, id: &str) -> Result<()> {
        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        search::delete_entry(&tx, id, SourceKind::Document)?;
        let deleted = tx.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        tx.commit()?;

        if deleted == 0 {
            return Err(ChronicleError::DocumentNotFound(id.to_string()));
        }
        debug!(document_id = id, "document deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Rebuild
    // -----------------------------------------------------------------

    /// Rebuild the entire FTS index from the authoritative rows. Returns
    /// the number of entries written.
    pub fn rebuild_index(&self) -> Result<usize> {
        let events = self.list_events(None)?;
        let documents = {
            let conn = self.db.lock();
            let mut stmt = conn.prepare(
                "SELECT id, event_id, filename, text, page_count, page_offsets, created_at
                 FROM documents",
            )?;
            let rows = stmt.query_map([], map_document)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut guard = self.db.lock();
        let tx = guard.transaction()?;
        tx.execute("DELETE FROM entries_fts", [])?;

        let mut count = 0usize;
        for event in &events {
            search::upsert_entry(&tx, &event.id, SourceKind::Event, &event.id, &event_fields(event))?;
            count += 1;
            if let Some(transcript) = &event.transcript {
                search::upsert_entry(
                    &tx,
                    &event.id,
                    SourceKind::Transcript,
                    &event.id,
                    &transcript_fields(event, transcript),
                )?;
                count += 1;
            }
        }
        for doc in &documents {
            let timeline = events
                .iter()
                .find(|e| e.id == doc.event_id)
                .map(|e| e.timeline.clone())
                .unwrap_or_default();
            search::upsert_entry(
                &tx,
                &doc.id,
                SourceKind::Document,
                &doc.event_id,
                &IndexFields {
                    title: doc.filename.clone(),
                    body: doc.text.clone(),
                    timeline,
                },
            )?;
            count += 1;
        }
        tx.commit()?;

        info!(entries = count, "search index rebuilt");
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Projections and row mapping
// ---------------------------------------------------------------------------

fn event_fields(event: &Event) -> IndexFields {
    let mut body = event.description.clone();
    if let Some(tags) = &event.tags {
        if !tags.is_empty() {
            body.push('\n');
            body.push_str(tags);
        }
    }
    IndexFields {
        title: event.title.clone(),
        body,
        timeline: event.timeline.clone(),
    }
}

fn transcript_fields(event: &Event, transcript: &Transcript) -> IndexFields {
    IndexFields {
        title: event.title.clone(),
        body: transcript.text.clone(),
        timeline: event.timeline.clone(),
    }
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let transcript_json: Option<String> = row.get(8)?;
    let transcript = transcript_json.and_then(|json| serde_json::from_str(&json).ok());
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        timestamp: parse_datetime(row, 3)?,
        timeline: row.get(4)?,
        tags: row.get(5)?,
        actor: row.get(6)?,
        audio_file: row.get(7)?,
        transcript,
        created_at: parse_datetime(row, 9)?,
        updated_at: parse_datetime(row, 10)?,
    })
}

fn map_document(row: &Row<'_>) -> rusqlite::Result<Document> {
    let offsets_json: String = row.get(5)?;
    Ok(Document {
        id: row.get(0)?,
        event_id: row.get(1)?,
        filename: row.get(2)?,
        text: row.get(3)?,
        page_count: row.get(4)?,
        page_offsets: serde_json::from_str(&offsets_json).unwrap_or_else(|_| vec![0]),
        created_at: parse_datetime(row, 6)?,
    })
}

fn parse_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
