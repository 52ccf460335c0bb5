//! Room state machine: lobby -> quiz -> results.
//!
//! A [`RoomSession`] is one player's handle on one room. Every transition is
//! a write to the room document; the session's own view of the room only
//! changes when a snapshot notification arrives, whoever caused it. After a
//! successful write the session applies whatever notifications are already
//! queued, so a local store reflects the write immediately.

use quizduel_shared::catalog::{question_at, Question};
use quizduel_shared::config::QuizConfig;
use quizduel_shared::document::{FieldOp, Guard};
use quizduel_shared::protocol::ErrorCode;
use quizduel_shared::room::{
    answers_value, new_room_ops, players_value, PlayerEntry, RoomDoc, Stage, FIELD_ANSWERS,
    FIELD_CURRENT_INDEX, FIELD_JOINED_AT, FIELD_PLAYERS, FIELD_SCORE, FIELD_STAGE,
};
use quizduel_shared::view::{project, RoomView};
use serde_json::{json, Value};

use crate::store::{DocSnapshot, DocumentStore, StoreError, Subscription};

/// How room writes are expressed against the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum WriteStrategy {
    /// Per-player field paths with guards. Concurrent joins and answers commute.
    #[default]
    PerKey,
    /// Read the cached map, modify, write the whole map back. Concurrent
    /// writers can overwrite each other.
    WholeMap,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("not in a room")]
    NotJoined,
    #[error("room is in {found}, expected {expected}")]
    WrongStage { expected: Stage, found: Stage },
    #[error("{0}")]
    InvalidInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The room did not exist and was created with us in it
    Created,
    Joined,
    /// Our name was already in the room; score kept
    Rejoined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    NeedMorePlayers { present: usize, required: usize },
    /// Someone else moved the room out of the lobby first
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Recorded { correct: bool, scored: bool },
    AlreadyAnswered,
    /// The question changed before the answer landed
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Moved to the question at this index
    Question(usize),
    Results,
    /// Someone else advanced first
    Stale,
}

struct Joined {
    room: String,
    player: String,
    snapshot: Option<RoomDoc>,
    subscription: Subscription,
}

pub struct RoomSession<S: DocumentStore> {
    store: S,
    catalog: &'static [Question],
    config: QuizConfig,
    strategy: WriteStrategy,
    joined: Option<Joined>,
}

fn clean(field: &str, raw: &str) -> Result<String, SessionError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(SessionError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn precondition_failed(result: &Result<Value, StoreError>) -> bool {
    matches!(result, Err(e) if e.is(ErrorCode::PreconditionFailed))
}

impl<S: DocumentStore> RoomSession<S> {
    pub fn new(
        store: S,
        catalog: &'static [Question],
        config: QuizConfig,
        strategy: WriteStrategy,
    ) -> Self {
        Self {
            store,
            catalog,
            config,
            strategy,
            joined: None,
        }
    }

    pub fn strategy(&self) -> WriteStrategy {
        self.strategy
    }

    pub fn catalog(&self) -> &'static [Question] {
        self.catalog
    }

    pub fn room(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.room.as_str())
    }

    pub fn player(&self) -> Option<&str> {
        self.joined.as_ref().map(|j| j.player.as_str())
    }

    /// Latest decoded room document.
    pub fn snapshot(&self) -> Option<&RoomDoc> {
        self.joined.as_ref()?.snapshot.as_ref()
    }

    pub fn stage(&self) -> Option<Stage> {
        self.snapshot().map(RoomDoc::stage)
    }

    /// What the local player should see right now.
    pub fn view(&self) -> RoomView {
        let player = self.player().unwrap_or_default();
        project(self.snapshot(), player, self.catalog, &self.config)
    }

    /// Enter `room_code` as `player_name`, creating the room if needed.
    pub async fn join_room(
        &mut self,
        room_code: &str,
        player_name: &str,
    ) -> Result<JoinOutcome, SessionError> {
        let room = clean("room code", room_code)?;
        let player = clean("player name", player_name)?;

        // Leaving the old room first releases its subscription.
        self.joined = None;

        let existing = self.store.get(&room).await?;
        let outcome = match (self.strategy, existing) {
            (WriteStrategy::PerKey, None) => {
                match self.store.create(&room, new_room_ops(&player)).await {
                    Ok(_) => JoinOutcome::Created,
                    Err(e) if e.is(ErrorCode::AlreadyExists) => {
                        self.add_player_per_key(&room, &player).await?
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            (WriteStrategy::PerKey, Some(_)) => self.add_player_per_key(&room, &player).await?,
            (WriteStrategy::WholeMap, None) => {
                self.store.set(&room, new_room_ops(&player)).await?;
                JoinOutcome::Created
            }
            (WriteStrategy::WholeMap, Some(doc)) => {
                let mut players = RoomDoc::decode(&doc)
                    .map(|r| r.players().clone())
                    .unwrap_or_default();
                let rejoin = players.contains_key(&player);
                players.insert(
                    player.clone(),
                    PlayerEntry {
                        score: 0,
                        joined_at: None,
                    },
                );
                let mut ops = vec![FieldOp::set([FIELD_PLAYERS], players_value(&players))];
                ops.push(FieldOp::server_timestamp([
                    FIELD_PLAYERS,
                    player.as_str(),
                    FIELD_JOINED_AT,
                ]));
                self.store.update(&room, vec![], ops).await?;
                if rejoin {
                    JoinOutcome::Rejoined
                } else {
                    JoinOutcome::Joined
                }
            }
        };

        let subscription = self.store.subscribe(&room).await?;
        tracing::info!("{} entered room {} ({:?})", player, room, outcome);
        self.joined = Some(Joined {
            room,
            player,
            snapshot: None,
            subscription,
        });
        self.pump();
        Ok(outcome)
    }

    async fn add_player_per_key(
        &self,
        room: &str,
        player: &str,
    ) -> Result<JoinOutcome, SessionError> {
        let result = self
            .store
            .update(
                room,
                vec![Guard::absent([FIELD_PLAYERS, player])],
                vec![
                    FieldOp::set([FIELD_PLAYERS, player, FIELD_SCORE], json!(0)),
                    FieldOp::server_timestamp([FIELD_PLAYERS, player, FIELD_JOINED_AT]),
                ],
            )
            .await;
        if precondition_failed(&result) {
            return Ok(JoinOutcome::Rejoined);
        }
        result?;
        Ok(JoinOutcome::Joined)
    }

    fn joined(&self) -> Result<&Joined, SessionError> {
        self.joined.as_ref().ok_or(SessionError::NotJoined)
    }

    /// Move the room from lobby to the first question. `force` skips the
    /// minimum player count (solo play).
    pub async fn start_quiz(&mut self, force: bool) -> Result<StartOutcome, SessionError> {
        let joined = self.joined()?;
        let present = joined.snapshot.as_ref().map_or(0, |r| r.players().len());
        if let Some(found) = joined.snapshot.as_ref().map(RoomDoc::stage) {
            if found != Stage::Lobby {
                return Err(SessionError::WrongStage {
                    expected: Stage::Lobby,
                    found,
                });
            }
        }
        let required = self.config.min_players_to_start;
        if !force && present < required {
            return Ok(StartOutcome::NeedMorePlayers { present, required });
        }

        let guards = match self.strategy {
            WriteStrategy::PerKey => vec![Guard::equals([FIELD_STAGE], json!(Stage::Lobby.as_str()))],
            WriteStrategy::WholeMap => vec![],
        };
        let ops = vec![
            FieldOp::set([FIELD_STAGE], json!(Stage::Quiz.as_str())),
            FieldOp::set([FIELD_CURRENT_INDEX], json!(0)),
            FieldOp::set([FIELD_ANSWERS], json!({})),
        ];
        let result = self.store.update(&joined.room, guards, ops).await;
        if precondition_failed(&result) {
            return Ok(StartOutcome::AlreadyStarted);
        }
        result?;
        tracing::info!("Room {} started", joined.room);
        self.pump();
        Ok(StartOutcome::Started)
    }

    /// Record the local player's pick for the current question and score it
    /// if correct. A second answer to the same question is never written.
    /// The index is stored as given; range checks belong to the caller.
    pub async fn submit_answer(&mut self, option: usize) -> Result<AnswerOutcome, SessionError> {
        let joined = self.joined()?;
        let quiz = match &joined.snapshot {
            Some(RoomDoc::Quiz(quiz)) => quiz,
            other => {
                return Err(SessionError::WrongStage {
                    expected: Stage::Quiz,
                    found: other.as_ref().map_or(Stage::Lobby, RoomDoc::stage),
                })
            }
        };
        let Some(question) = question_at(self.catalog, quiz.current_index) else {
            return Err(SessionError::WrongStage {
                expected: Stage::Quiz,
                found: Stage::Results,
            });
        };
        let player = joined.player.as_str();
        if quiz.answer_of(player, question.id).is_some() {
            return Ok(AnswerOutcome::AlreadyAnswered);
        }
        let correct = question.is_correct(option);

        let answer = match self.strategy {
            WriteStrategy::PerKey => {
                self.store
                    .update(
                        &joined.room,
                        vec![
                            Guard::absent([FIELD_ANSWERS, player, question.id]),
                            Guard::equals([FIELD_STAGE], json!(Stage::Quiz.as_str())),
                            Guard::equals([FIELD_CURRENT_INDEX], json!(quiz.current_index)),
                        ],
                        vec![FieldOp::set([FIELD_ANSWERS, player, question.id], json!(option))],
                    )
                    .await
            }
            WriteStrategy::WholeMap => {
                let mut answers = quiz.answers.clone();
                answers
                    .entry(player.to_string())
                    .or_default()
                    .insert(question.id.to_string(), option);
                self.store
                    .update(
                        &joined.room,
                        vec![],
                        vec![FieldOp::set([FIELD_ANSWERS], answers_value(&answers))],
                    )
                    .await
            }
        };
        if precondition_failed(&answer) {
            return Ok(AnswerOutcome::Stale);
        }
        answer?;

        if !correct {
            self.pump();
            return Ok(AnswerOutcome::Recorded {
                correct,
                scored: false,
            });
        }

        let ops = match self.strategy {
            WriteStrategy::PerKey => vec![FieldOp::increment([FIELD_PLAYERS, player, FIELD_SCORE], 1)],
            WriteStrategy::WholeMap => {
                let mut players = quiz.players.clone();
                players.entry(player.to_string()).or_default().score += 1;
                vec![FieldOp::set([FIELD_PLAYERS], players_value(&players))]
            }
        };
        self.store.update(&joined.room, vec![], ops).await?;
        self.pump();
        Ok(AnswerOutcome::Recorded {
            correct,
            scored: true,
        })
    }

    /// Advance to the next question, or to results after the last one.
    pub async fn next_question(&mut self) -> Result<Advance, SessionError> {
        let joined = self.joined()?;
        let current = match &joined.snapshot {
            Some(RoomDoc::Quiz(quiz)) => quiz.current_index,
            other => {
                return Err(SessionError::WrongStage {
                    expected: Stage::Quiz,
                    found: other.as_ref().map_or(Stage::Lobby, RoomDoc::stage),
                })
            }
        };

        let guards = match self.strategy {
            WriteStrategy::PerKey => vec![
                Guard::equals([FIELD_STAGE], json!(Stage::Quiz.as_str())),
                Guard::equals([FIELD_CURRENT_INDEX], json!(current)),
            ],
            WriteStrategy::WholeMap => vec![],
        };
        let next = current + 1;
        let (ops, advance) = if next < self.catalog.len() {
            (
                vec![FieldOp::set([FIELD_CURRENT_INDEX], json!(next))],
                Advance::Question(next),
            )
        } else {
            (
                vec![FieldOp::set([FIELD_STAGE], json!(Stage::Results.as_str()))],
                Advance::Results,
            )
        };

        let result = self.store.update(&joined.room, guards, ops).await;
        if precondition_failed(&result) {
            return Ok(Advance::Stale);
        }
        result?;
        tracing::info!("Room {} advanced: {:?}", joined.room, advance);
        self.pump();
        Ok(advance)
    }

    /// Replace the cached snapshot. A missing document keeps the last one; a
    /// document that does not decode is logged and ignored.
    pub fn apply_snapshot(&mut self, snapshot: DocSnapshot) {
        let Some(joined) = self.joined.as_mut() else {
            return;
        };
        if snapshot.key != joined.room {
            return;
        }
        let Some(doc) = snapshot.doc else {
            return;
        };
        match RoomDoc::decode(&doc) {
            Ok(room) => {
                let before = joined.snapshot.as_ref().map(RoomDoc::stage);
                if before != Some(room.stage()) {
                    tracing::info!("Room {} is now in {}", joined.room, room.stage());
                }
                joined.snapshot = Some(room);
            }
            Err(e) => tracing::warn!("Ignoring undecodable room {}: {}", joined.room, e),
        }
    }

    /// Apply every notification already queued. Returns how many there were.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(snapshot) = self
            .joined
            .as_mut()
            .and_then(|j| j.subscription.try_recv())
        {
            self.apply_snapshot(snapshot);
            applied += 1;
        }
        applied
    }

    /// Wait for the next notification and apply it. Returns `false` when the
    /// subscription has ended. Never resolves while not in a room.
    pub async fn next_change(&mut self) -> bool {
        let Some(joined) = self.joined.as_mut() else {
            return std::future::pending().await;
        };
        match joined.subscription.recv().await {
            Some(snapshot) => {
                self.apply_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    /// Drop the subscription and forget the room.
    pub fn leave(&mut self) {
        if let Some(joined) = self.joined.take() {
            tracing::info!("{} left room {}", joined.player, joined.room);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use quizduel_shared::catalog::QUESTIONS;

    fn session(store: &MemoryStore) -> RoomSession<MemoryStore> {
        RoomSession::new(
            store.clone(),
            QUESTIONS,
            QuizConfig::default(),
            WriteStrategy::PerKey,
        )
    }

    #[tokio::test]
    async fn blank_names_rejected() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        assert!(matches!(
            s.join_room("  ", "Ali").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(matches!(
            s.join_room("BIO123", "").await,
            Err(SessionError::InvalidInput(_))
        ));
        assert!(store.get("BIO123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn operations_before_join_fail() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        assert!(matches!(s.start_quiz(false).await, Err(SessionError::NotJoined)));
        assert!(matches!(s.submit_answer(0).await, Err(SessionError::NotJoined)));
        assert!(matches!(s.next_question().await, Err(SessionError::NotJoined)));
        assert!(matches!(s.view(), RoomView::Lobby(_)));
    }

    #[tokio::test]
    async fn join_trims_and_snapshot_arrives() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        let outcome = s.join_room(" BIO123 ", " Ali ").await.unwrap();
        assert_eq!(outcome, JoinOutcome::Created);
        assert_eq!(s.room(), Some("BIO123"));
        assert_eq!(s.player(), Some("Ali"));
        assert_eq!(s.stage(), Some(Stage::Lobby));
        assert!(s.snapshot().unwrap().has_player("Ali"));
    }

    #[tokio::test]
    async fn answering_in_lobby_is_wrong_stage() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.join_room("R", "Ali").await.unwrap();
        match s.submit_answer(0).await {
            Err(SessionError::WrongStage { expected, found }) => {
                assert_eq!(expected, Stage::Quiz);
                assert_eq!(found, Stage::Lobby);
            }
            other => panic!("expected wrong stage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn out_of_range_option_recorded_as_wrong() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.join_room("R", "Ali").await.unwrap();
        s.start_quiz(true).await.unwrap();
        assert_eq!(
            s.submit_answer(7).await.unwrap(),
            AnswerOutcome::Recorded {
                correct: false,
                scored: false
            }
        );
        let doc = store.get("R").await.unwrap().unwrap();
        assert_eq!(doc["answers"]["Ali"]["stomach"], 7);
        assert_eq!(doc["players"]["Ali"]["score"], 0);
    }

    #[tokio::test]
    async fn undecodable_snapshot_keeps_last_good() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.join_room("R", "Ali").await.unwrap();
        let before = s.snapshot().cloned();

        s.apply_snapshot(DocSnapshot {
            key: "R".to_string(),
            doc: Some(json!({"stage": "dancing"})),
        });
        assert_eq!(s.snapshot().cloned(), before);

        s.apply_snapshot(DocSnapshot {
            key: "R".to_string(),
            doc: None,
        });
        assert_eq!(s.snapshot().cloned(), before);
    }

    #[tokio::test]
    async fn snapshots_for_other_rooms_ignored() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.join_room("R", "Ali").await.unwrap();
        s.apply_snapshot(DocSnapshot {
            key: "OTHER".to_string(),
            doc: Some(json!({"stage": "results", "players": {}})),
        });
        assert_eq!(s.stage(), Some(Stage::Lobby));
    }

    #[tokio::test]
    async fn changing_room_releases_subscription() {
        let store = MemoryStore::new();
        let mut s = session(&store);
        s.join_room("A", "Ali").await.unwrap();
        assert_eq!(store.watcher_count("A"), 1);
        s.join_room("B", "Ali").await.unwrap();
        assert_eq!(store.watcher_count("A"), 0);
        assert_eq!(store.watcher_count("B"), 1);
        s.leave();
        assert_eq!(store.watcher_count("B"), 0);
        assert_eq!(s.room(), None);
    }
}
