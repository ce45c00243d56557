//! End-to-end search behavior against an on-disk store: indexing fired by
//! CRUD writes, sanitized query execution, ranking, and entry lifecycle.

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;

use chronicle::config::SearchConfig;
use chronicle::search::SourceKind;
use chronicle::store::{DocumentInput, EventInput, EventStore};
use chronicle::transcript::{Transcript, Word};

fn open_store(dir: &tempfile::TempDir) -> EventStore {
    EventStore::open(&dir.path().join("chronicle.db"), SearchConfig::default()).unwrap()
}

fn event_at(title: &str, description: &str, year: i32) -> EventInput {
    EventInput {
        title: title.to_string(),
        description: description.to_string(),
        timestamp: Utc.with_ymd_and_hms(year, 6, 1, 12, 0, 0).unwrap(),
        timeline: "personal".to_string(),
        tags: None,
        actor: None,
        audio_file: None,
    }
}

fn transcript_of(text: &str) -> Transcript {
    let words: Vec<Word> = text
        .split_whitespace()
        .enumerate()
        .map(|(i, w)| Word {
            text: w.to_string(),
            start: i as f64 * 0.5,
            end: i as f64 * 0.5 + 0.4,
        })
        .collect();
    let duration = words.last().map(|w| w.end).unwrap_or(0.0);
    Transcript {
        text: text.to_string(),
        words,
        language: "en".to_string(),
        duration,
    }
}

#[test]
fn exact_title_search_ranks_event_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .create_event(event_at("Grocery run", "bought milk and coffee", 2025))
        .unwrap();
    let target = store
        .create_event(event_at(
            "Town council budget hearing",
            "the council discussed roads",
            2025,
        ))
        .unwrap();
    store
        .create_event(event_at("Dentist", "hearing about a crown", 2025))
        .unwrap();

    let hits = store.index().search("Town council budget hearing", 10);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].event_id, target.id);
}

#[test]
fn question_style_query_matches_either_word() {
    // Scenario: a question-mark query with two bare words is OR-joined and
    // returns events containing either word.
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let a = store
        .create_event(event_at("Mic test", "quick audio check", 2025))
        .unwrap();
    let b = store
        .create_event(event_at("Interview", "transcriptions reviewed", 2025))
        .unwrap();
    store
        .create_event(event_at("Unrelated", "lawn mowing", 2025))
        .unwrap();

    let hits = store.index().search("test transcriptions?", 10);
    let ids: Vec<&str> = hits.iter().map(|h| h.event_id.as_str()).collect();
    assert_eq!(hits.len(), 2);
    assert!(ids.contains(&a.id.as_str()));
    assert!(ids.contains(&b.id.as_str()));
}

#[test]
fn not_operator_excludes_even_when_other_term_matches() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .create_event(event_at(
            "Call with Daniel",
            "about the subdivision plat",
            2025,
        ))
        .unwrap();
    let keep = store
        .create_event(event_at("Daniel lunch", "catching up downtown", 2025))
        .unwrap();

    let hits = store.index().search("daniel NOT subdivision", 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].event_id, keep.id);
}

#[test]
fn reindexing_same_content_produces_no_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let event = store
        .create_event(event_at("Standup", "weekly sync notes", 2025))
        .unwrap();
    // Editing with unchanged content re-upserts the same entry.
    store
        .update_event(&event.id, event_at("Standup", "weekly sync notes", 2025))
        .unwrap();

    assert_eq!(store.index().search("standup", 10).len(), 1);
}

#[test]
fn transcript_hits_carry_word_jump_targets() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let event = store
        .create_event(event_at("Site visit", "", 2025))
        .unwrap();
    store
        .set_transcript(
            &event.id,
            transcript_of("we walked the easement boundary today"),
        )
        .unwrap();

    let hits = store.index().search("easement", 10);
    let transcript_hit = hits
        .iter()
        .find(|h| h.kind == SourceKind::Transcript)
        .expect("transcript entry should match");
    assert_eq!(transcript_hit.matched_terms, vec!["easement".to_string()]);

    let stored = store.get_event(&event.id).unwrap().unwrap();
    let targets = stored
        .transcript
        .unwrap()
        .jump_targets(&transcript_hit.matched_terms);
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].start, 1.5);
}

#[test]
fn document_hits_resolve_page_locator() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let event = store.create_event(event_at("Filing", "", 2025)).unwrap();
    let doc = store
        .attach_document(
            &event.id,
            DocumentInput {
                filename: "plat.pdf".to_string(),
                text: "first page is boilerplate. second page covers setback rules."
                    .to_string(),
                page_offsets: vec![0, 27],
            },
        )
        .unwrap();

    let hits = store.index().search("setback", 10);
    let doc_hit = hits
        .iter()
        .find(|h| h.kind == SourceKind::Document)
        .expect("document entry should match");
    assert_eq!(doc_hit.source_id, doc.id);

    let stored = store.get_document(&doc.id).unwrap().unwrap();
    assert_eq!(stored.page_for_term(&doc_hit.matched_terms[0]), 2);
}

#[test]
fn deleting_an_event_removes_every_derived_entry() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    let event = store
        .create_event(event_at("Inspection", "furnace inspection", 2025))
        .unwrap();
    store
        .set_transcript(&event.id, transcript_of("furnace filter replaced"))
        .unwrap();
    store
        .attach_document(
            &event.id,
            DocumentInput {
                filename: "furnace-report.txt".to_string(),
                text: "furnace passed inspection".to_string(),
                page_offsets: vec![],
            },
        )
        .unwrap();

    assert!(!store.index().search("furnace", 10).is_empty());
    store.delete_event(&event.id).unwrap();
    assert!(store.index().search("furnace", 10).is_empty());
}

#[test]
fn rebuild_restores_a_cleared_index() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);

    store
        .create_event(event_at("Archived event", "older material", 2024))
        .unwrap();
    store.index().clear().unwrap();
    assert!(store.index().search("archived", 10).is_empty());

    store.rebuild_index().unwrap();
    assert_eq!(store.index().search("archived", 10).len(), 1);
}

#[test]
fn garbage_query_yields_empty_results_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    store
        .create_event(event_at("Anything", "content", 2025))
        .unwrap();

    assert!(store.index().search("?!(){}", 10).is_empty());
    assert!(store.index().search("", 10).is_empty());
}
