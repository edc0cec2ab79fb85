use std::collections::HashSet;
use std::mem;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::identity::IdentityMapper;
use super::merge::{
    dedup, enforce_cap, reconcile, reconcile_by_revision, remove_by_key, upsert_front,
    upsert_in_place,
};
use super::views::{InsightView, TranscriptView};
use crate::models::{AttendeeQuestion, Insight, Table, Transcript};
use crate::wire::{Envelope, EventType, NoticePayload, TableDeleted};

const MAX_PENDING_NOTICES: usize = 100;

/// Upper bounds on the locally merged activity streams. Oldest entries are
/// evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub transcripts: usize,
    pub insights: usize,
    pub questions: usize,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            transcripts: 2000,
            insights: 500,
            questions: 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed `{event_type}` payload: {source}")]
    Payload {
        event_type: EventType,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Merged,
    /// Well-formed but not for this event, or nothing to change.
    Ignored,
}

/// Full REST read of one event.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tables: Vec<Table>,
    pub transcripts: Vec<Transcript>,
    pub insights: Vec<Insight>,
    pub questions: Vec<AttendeeQuestion>,
}

/// Converged local picture of one event. Pushes and snapshots may arrive in
/// any order; both paths merge by id.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveState {
    event_id: i32,
    retention: Retention,
    tables: Vec<Table>,
    /// Tables pushed since the last snapshot.
    pushed_tables: HashSet<i32>,
    /// Deleted tables a snapshot has not yet confirmed gone.
    deleted_tables: HashSet<i32>,
    mapper: IdentityMapper,
    transcripts: Vec<TranscriptView>,
    insights: Vec<InsightView>,
    questions: Vec<AttendeeQuestion>,
    notices: Vec<NoticePayload>,
}

impl LiveState {
    pub fn new(event_id: i32, retention: Retention) -> Self {
        Self {
            event_id,
            retention,
            tables: Vec::new(),
            pushed_tables: HashSet::new(),
            deleted_tables: HashSet::new(),
            mapper: IdentityMapper::default(),
            transcripts: Vec::new(),
            insights: Vec::new(),
            questions: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn event_id(&self) -> i32 {
        self.event_id
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn mapper(&self) -> &IdentityMapper {
        &self.mapper
    }

    pub fn transcripts(&self) -> &[TranscriptView] {
        &self.transcripts
    }

    pub fn insights(&self) -> &[InsightView] {
        &self.insights
    }

    pub fn questions(&self) -> &[AttendeeQuestion] {
        &self.questions
    }

    pub fn notices(&self) -> &[NoticePayload] {
        &self.notices
    }

    pub fn take_notices(&mut self) -> Vec<NoticePayload> {
        mem::take(&mut self.notices)
    }

    /// Segments still shown under a raw table id.
    pub fn unmapped_transcripts(&self) -> usize {
        self.transcripts
            .iter()
            .filter(|segment| segment.is_unmapped(&self.mapper))
            .count()
    }

    pub fn apply_envelope(&mut self, envelope: &Envelope) -> Result<Applied, ApplyError> {
        match envelope.kind() {
            Some(kind) => self.apply(kind, &envelope.data),
            None => {
                debug!(event_type = %envelope.event_type, "ignoring unknown push type");
                Ok(Applied::Ignored)
            }
        }
    }

    /// Merges one push. A payload that does not decode leaves the state
    /// untouched.
    pub fn apply(&mut self, kind: EventType, data: &Value) -> Result<Applied, ApplyError> {
        match kind {
            EventType::TableCreated | EventType::TableUpdated => {
                let table: Table = decode(kind, data)?;
                if table.event_id != self.event_id || self.deleted_tables.contains(&table.id) {
                    return Ok(Applied::Ignored);
                }
                self.pushed_tables.insert(table.id);
                let tables = upsert_in_place(mem::take(&mut self.tables), table);
                self.set_tables(tables);
            }
            EventType::TableDeleted => {
                let deleted: TableDeleted = decode(kind, data)?;
                self.pushed_tables.remove(&deleted.id);
                let tombstoned = self.deleted_tables.insert(deleted.id);
                if !self.tables.iter().any(|table| table.id == deleted.id) {
                    return Ok(if tombstoned { Applied::Merged } else { Applied::Ignored });
                }
                let tables = remove_by_key(mem::take(&mut self.tables), &deleted.id);
                self.set_tables(tables);
            }
            EventType::TranscriptAdded => {
                let transcript: Transcript = decode(kind, data)?;
                self.merge_transcript(transcript);
            }
            EventType::InsightAdded | EventType::InsightUpdated => {
                let insight: Insight = decode(kind, data)?;
                if insight.event_id != self.event_id {
                    return Ok(Applied::Ignored);
                }
                self.merge_insights(vec![insight]);
            }
            EventType::InsightsGenerated => {
                let batch: Vec<Insight> = decode(kind, data)?;
                let batch: Vec<Insight> = batch
                    .into_iter()
                    .filter(|insight| insight.event_id == self.event_id)
                    .collect();
                if batch.is_empty() {
                    return Ok(Applied::Ignored);
                }
                self.merge_insights(batch);
            }
            EventType::Notice => {
                let notice: NoticePayload = decode(kind, data)?;
                if notice.event_id != self.event_id {
                    return Ok(Applied::Ignored);
                }
                self.notices.push(notice);
                if self.notices.len() > MAX_PENDING_NOTICES {
                    let overflow = self.notices.len() - MAX_PENDING_NOTICES;
                    self.notices.drain(..overflow);
                }
            }
            EventType::QuestionAdded => {
                let question: AttendeeQuestion = decode(kind, data)?;
                if question.event_id != self.event_id {
                    return Ok(Applied::Ignored);
                }
                self.questions = enforce_cap(
                    upsert_front(mem::take(&mut self.questions), question),
                    self.retention.questions,
                );
            }
        }
        Ok(Applied::Merged)
    }

    /// Folds a REST read into the pushed state. A snapshot fetched before
    /// a push landed cannot undo it: tables pushed since the last snapshot
    /// keep their pushed copy, deleted tables stay deleted, an edited
    /// insight keeps its newer revision, and pushed activity the snapshot
    /// lacks is kept.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let event_id = self.event_id;
        let fresh_tables: Vec<Table> = dedup(
            snapshot
                .tables
                .into_iter()
                .filter(|table| table.event_id == event_id)
                .collect(),
        );
        let listed: HashSet<i32> = fresh_tables.iter().map(|table| table.id).collect();
        let pushed = mem::take(&mut self.pushed_tables);
        let deleted = &self.deleted_tables;
        let mut tables: Vec<Table> = fresh_tables
            .into_iter()
            .filter(|table| !deleted.contains(&table.id) && !pushed.contains(&table.id))
            .collect();
        let mut pushed_copies = Vec::new();
        for table in &self.tables {
            if pushed.contains(&table.id) {
                pushed_copies.push(table.clone());
            }
        }
        for table in pushed_copies {
            tables = upsert_in_place(tables, table);
        }
        // A listing without the id confirms the delete.
        self.deleted_tables.retain(|id| listed.contains(id));
        self.set_tables(tables);

        let mapper = &self.mapper;
        let fresh = snapshot
            .transcripts
            .into_iter()
            .map(|transcript| TranscriptView::from_wire(transcript, mapper))
            .collect();
        self.transcripts = enforce_cap(
            reconcile(mem::take(&mut self.transcripts), fresh, |segment| {
                (segment.timestamp, segment.id)
            }),
            self.retention.transcripts,
        );

        let fresh = snapshot
            .insights
            .into_iter()
            .filter(|insight| insight.event_id == event_id)
            .map(|insight| InsightView::from_wire(insight, mapper))
            .collect();
        self.insights = enforce_cap(
            reconcile_by_revision(
                mem::take(&mut self.insights),
                fresh,
                |view| (view.insight.created_at, view.insight.id),
                |view| view.insight.updated_at,
            ),
            self.retention.insights,
        );

        let fresh = snapshot
            .questions
            .into_iter()
            .filter(|question| question.event_id == event_id)
            .collect();
        self.questions = enforce_cap(
            reconcile(mem::take(&mut self.questions), fresh, |question| {
                (question.created_at, question.id)
            }),
            self.retention.questions,
        );
    }

    fn merge_transcript(&mut self, transcript: Transcript) {
        let view = TranscriptView::from_wire(transcript, &self.mapper);
        if view.is_unmapped(&self.mapper) {
            debug!(table_id = view.table_id, "segment for unknown table kept under raw id");
        }
        self.transcripts = enforce_cap(
            upsert_front(mem::take(&mut self.transcripts), view),
            self.retention.transcripts,
        );
    }

    /// A copy older than the one already held is dropped.
    fn merge_insights(&mut self, batch: Vec<Insight>) {
        let merged = batch.into_iter().fold(mem::take(&mut self.insights), |acc, insight| {
            let superseded = acc.iter().any(|held| {
                held.insight.id == insight.id && held.insight.updated_at > insight.updated_at
            });
            if superseded {
                acc
            } else {
                upsert_front(acc, InsightView::from_wire(insight, &self.mapper))
            }
        });
        self.insights = enforce_cap(merged, self.retention.insights);
    }

    /// Replaces the table list and rebuilds everything derived from it.
    fn set_tables(&mut self, tables: Vec<Table>) {
        self.tables = tables;
        self.mapper = IdentityMapper::from_tables(&self.tables);
        let mapper = &self.mapper;
        self.transcripts = mem::take(&mut self.transcripts)
            .into_iter()
            .map(|segment| segment.rekey(mapper))
            .collect();
        self.insights = mem::take(&mut self.insights)
            .into_iter()
            .map(|view| view.rekey(mapper))
            .collect();
    }
}

fn decode<T: DeserializeOwned>(event_type: EventType, data: &Value) -> Result<T, ApplyError> {
    T::deserialize(data).map_err(|source| ApplyError::Payload { event_type, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap()
    }

    fn table(id: i32, code: &str) -> Value {
        json!({
            "id": id, "eventId": 1, "joinCode": code, "name": format!("Table {id}"),
            "status": "ACTIVE", "isHot": false, "createdAt": t0()
        })
    }

    fn transcript(id: i32, table_id: i32, secs: i64) -> Value {
        json!({
            "id": id, "tableId": table_id, "timestamp": t0() + Duration::seconds(secs),
            "speaker": "Ana", "text": format!("segment {id}"), "sentiment": 0.1, "isQuote": false
        })
    }

    fn insight(id: i32, description: &str) -> Value {
        revised_insight(id, description, 0)
    }

    fn revised_insight(id: i32, description: &str, edited_secs: i64) -> Value {
        json!({
            "id": id, "eventId": 1, "type": "THEME", "title": "Pricing",
            "description": description, "confidence": 0.9, "relatedTableIds": [42],
            "evidenceCount": 3, "status": "PENDING", "createdAt": t0(),
            "updatedAt": t0() + Duration::seconds(edited_secs)
        })
    }

    fn envelope(kind: EventType, data: Value) -> Envelope {
        Envelope::new(kind, data)
    }

    fn decoded<T: DeserializeOwned>(value: Value) -> T {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn drifted_segment_is_kept_then_rekeyed_by_snapshot() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            ..Snapshot::default()
        });

        state
            .apply_envelope(&envelope(EventType::TranscriptAdded, transcript(7, 42, 5)))
            .unwrap();
        assert_eq!(state.transcripts()[0].table, "42");
        assert_eq!(state.unmapped_transcripts(), 1);

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111")), decoded(table(42, "K7Q2ZX"))],
            ..Snapshot::default()
        });
        assert_eq!(state.transcripts().len(), 1);
        assert_eq!(state.transcripts()[0].table, "K7Q2ZX");
        assert_eq!(state.unmapped_transcripts(), 0);
    }

    #[test]
    fn table_push_rekeys_existing_entries() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TranscriptAdded, &transcript(1, 42, 0)).unwrap();
        state.apply(EventType::InsightAdded, &insight(5, "d")).unwrap();
        assert_eq!(state.insights()[0].related_tables, vec!["42"]);

        state.apply(EventType::TableCreated, &table(42, "K7Q2ZX")).unwrap();
        assert_eq!(state.transcripts()[0].table, "K7Q2ZX");
        assert_eq!(state.insights()[0].related_tables, vec!["K7Q2ZX"]);
    }

    #[test]
    fn mapper_follows_table_updates() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TableCreated, &table(3, "OLD001")).unwrap();
        state.apply(EventType::TranscriptAdded, &transcript(1, 3, 0)).unwrap();

        state.apply(EventType::TableUpdated, &table(3, "NEW001")).unwrap();
        assert_eq!(state.mapper().resolve(3), "NEW001");
        assert_eq!(state.transcripts()[0].table, "NEW001");
        assert_eq!(state.tables().len(), 1);

        state.apply(EventType::TableDeleted, &json!({ "id": 3 })).unwrap();
        assert!(state.tables().is_empty());
        assert_eq!(state.transcripts()[0].table, "3");
    }

    #[test]
    fn replaying_envelopes_is_idempotent() {
        let pushes = vec![
            envelope(EventType::TableCreated, table(42, "K7Q2ZX")),
            envelope(EventType::TranscriptAdded, transcript(1, 42, 0)),
            envelope(EventType::InsightAdded, insight(9, "first")),
            envelope(EventType::QuestionAdded, json!({
                "id": 2, "eventId": 1, "question": "Roadmap?", "isAnonymous": true,
                "votes": 0, "answered": false, "createdAt": t0()
            })),
        ];

        for push in &pushes {
            let mut once = LiveState::new(1, Retention::default());
            once.apply_envelope(push).unwrap();
            let mut twice = once.clone();
            twice.apply_envelope(push).unwrap();
            assert_eq!(once, twice, "replaying {} changed state", push.event_type);
        }
    }

    #[test]
    fn later_insight_version_wins_at_head() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::InsightAdded, &insight(4, "other")).unwrap();
        state.apply(EventType::InsightAdded, &insight(5, "first")).unwrap();
        state.apply(EventType::InsightAdded, &insight(4, "older")).unwrap();
        state.apply(EventType::InsightAdded, &insight(5, "second")).unwrap();

        let ids: Vec<i32> = state.insights().iter().map(|view| view.insight.id).collect();
        assert_eq!(ids, vec![5, 4]);
        assert_eq!(state.insights()[0].insight.description.as_deref(), Some("second"));
    }

    #[test]
    fn generated_batch_merges_newest_at_head() {
        let mut state = LiveState::new(1, Retention::default());
        state
            .apply(EventType::InsightsGenerated, &json!([insight(1, "a"), insight(2, "b")]))
            .unwrap();
        let ids: Vec<i32> = state.insights().iter().map(|view| view.insight.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn other_events_and_unknown_types_are_ignored() {
        let mut state = LiveState::new(2, Retention::default());
        assert_eq!(
            state.apply(EventType::InsightAdded, &insight(1, "x")).unwrap(),
            Applied::Ignored
        );
        assert_eq!(
            state.apply(EventType::Notice, &json!({ "eventId": 1, "message": "hi" })).unwrap(),
            Applied::Ignored
        );
        let unknown = Envelope {
            event_type: "agenda_changed".into(),
            data: json!({}),
        };
        assert_eq!(state.apply_envelope(&unknown).unwrap(), Applied::Ignored);
        assert!(state.insights().is_empty());
    }

    #[test]
    fn malformed_payload_leaves_state_untouched() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TableCreated, &table(1, "AAA111")).unwrap();
        let before = state.clone();

        let err = state
            .apply(EventType::TranscriptAdded, &json!({ "id": "nope" }))
            .unwrap_err();
        assert!(err.to_string().contains("transcript_added"));
        assert_eq!(state, before);
    }

    #[test]
    fn snapshot_reconciles_with_pushes() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TableCreated, &table(1, "AAA111")).unwrap();
        state.apply(EventType::TranscriptAdded, &transcript(3, 1, 30)).unwrap();
        state.apply(EventType::TranscriptAdded, &transcript(99, 77, 40)).unwrap();

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            transcripts: vec![decoded(transcript(2, 1, 20)), decoded(transcript(1, 1, 10))],
            insights: vec![decoded(insight(1, "from snapshot"))],
            questions: Vec::new(),
        });

        let ids: Vec<i32> = state.transcripts().iter().map(|segment| segment.id).collect();
        assert_eq!(ids, vec![99, 3, 2, 1]);
        assert_eq!(state.unmapped_transcripts(), 1);
        assert_eq!(state.insights().len(), 1);

        let settled = state.clone();
        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            transcripts: vec![decoded(transcript(2, 1, 20)), decoded(transcript(1, 1, 10))],
            insights: vec![decoded(insight(1, "from snapshot"))],
            questions: Vec::new(),
        });
        assert_eq!(state, settled);
    }

    #[test]
    fn stale_snapshot_cannot_undo_a_table_push() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TranscriptAdded, &transcript(7, 42, 5)).unwrap();
        state.apply(EventType::TableCreated, &table(42, "K7Q2ZX")).unwrap();
        assert_eq!(state.transcripts()[0].table, "K7Q2ZX");

        // Fetched before table 42 existed.
        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            ..Snapshot::default()
        });
        let ids: Vec<i32> = state.tables().iter().map(|table| table.id).collect();
        assert_eq!(ids, vec![1, 42]);
        let segments: Vec<(i32, &str)> = state
            .transcripts()
            .iter()
            .map(|segment| (segment.id, segment.table.as_str()))
            .collect();
        assert_eq!(segments, vec![(7, "K7Q2ZX")]);

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111")), decoded(table(42, "K7Q2ZX"))],
            transcripts: vec![decoded(transcript(7, 42, 5))],
            ..Snapshot::default()
        });
        assert_eq!(state.tables().len(), 2);
        assert_eq!(state.transcripts().len(), 1);
        assert_eq!(state.transcripts()[0].table, "K7Q2ZX");
        assert_eq!(state.unmapped_transcripts(), 0);
    }

    #[test]
    fn unmapped_segment_survives_stale_snapshot_until_table_listed() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::TranscriptAdded, &transcript(7, 42, 5)).unwrap();

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            ..Snapshot::default()
        });
        let segments: Vec<(i32, &str)> = state
            .transcripts()
            .iter()
            .map(|segment| (segment.id, segment.table.as_str()))
            .collect();
        assert_eq!(segments, vec![(7, "42")]);

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111")), decoded(table(42, "K7Q2ZX"))],
            transcripts: vec![decoded(transcript(7, 42, 5))],
            ..Snapshot::default()
        });
        assert_eq!(state.transcripts().len(), 1);
        assert_eq!(state.transcripts()[0].table, "K7Q2ZX");
    }

    #[test]
    fn stale_snapshot_does_not_resurrect_a_deleted_table() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111")), decoded(table(2, "BBB222"))],
            ..Snapshot::default()
        });
        state.apply(EventType::TableDeleted, &json!({ "id": 2 })).unwrap();

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111")), decoded(table(2, "BBB222"))],
            ..Snapshot::default()
        });
        let ids: Vec<i32> = state.tables().iter().map(|table| table.id).collect();
        assert_eq!(ids, vec![1]);
        assert_eq!(
            state.apply(EventType::TableUpdated, &table(2, "BBB222")).unwrap(),
            Applied::Ignored
        );

        state.apply_snapshot(Snapshot {
            tables: vec![decoded(table(1, "AAA111"))],
            ..Snapshot::default()
        });
        assert_eq!(state.tables().len(), 1);
    }

    #[test]
    fn stale_snapshot_cannot_revert_an_insight_edit() {
        let mut state = LiveState::new(1, Retention::default());
        state.apply(EventType::InsightAdded, &insight(5, "old")).unwrap();
        state
            .apply(EventType::InsightUpdated, &revised_insight(5, "new", 60))
            .unwrap();

        state.apply_snapshot(Snapshot {
            insights: vec![decoded(insight(5, "old"))],
            ..Snapshot::default()
        });
        assert_eq!(state.insights().len(), 1);
        assert_eq!(state.insights()[0].insight.description.as_deref(), Some("new"));

        // A late copy of the original push changes nothing either.
        state.apply(EventType::InsightAdded, &insight(5, "old")).unwrap();
        assert_eq!(state.insights()[0].insight.description.as_deref(), Some("new"));

        state.apply_snapshot(Snapshot {
            insights: vec![decoded(revised_insight(5, "newer", 120))],
            ..Snapshot::default()
        });
        assert_eq!(state.insights()[0].insight.description.as_deref(), Some("newer"));
    }

    #[test]
    fn retention_evicts_oldest() {
        let retention = Retention {
            transcripts: 2,
            ..Retention::default()
        };
        let mut state = LiveState::new(1, retention);
        for id in 1..=4 {
            state.apply(EventType::TranscriptAdded, &transcript(id, 1, id as i64)).unwrap();
        }
        let ids: Vec<i32> = state.transcripts().iter().map(|segment| segment.id).collect();
        assert_eq!(ids, vec![4, 3]);
    }

    #[test]
    fn notices_are_collected_until_taken() {
        let mut state = LiveState::new(1, Retention::default());
        state
            .apply(EventType::Notice, &json!({ "eventId": 1, "tableIds": [3], "message": "Wrap up" }))
            .unwrap();
        assert_eq!(state.notices().len(), 1);
        let taken = state.take_notices();
        assert!(taken[0].targets(3));
        assert!(state.notices().is_empty());
    }
}
