//! Room document model.
//!
//! One document per room code. On the wire and in the store it is a flat JSON
//! object with a `stage` field; in Rust it is decoded into a tagged union so
//! that quiz-only fields are not reachable while the room is in the lobby.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ts_rs::TS;

use crate::document::{FieldOp, Timestamp};

pub const FIELD_STAGE: &str = "stage";
pub const FIELD_CURRENT_INDEX: &str = "currentIndex";
pub const FIELD_PLAYERS: &str = "players";
pub const FIELD_ANSWERS: &str = "answers";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_SCORE: &str = "score";
pub const FIELD_JOINED_AT: &str = "joinedAt";

/// Stages only ever advance: `Lobby < Quiz < Results`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Lobby,
    Quiz,
    Results,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Lobby => "lobby",
            Stage::Quiz => "quiz",
            Stage::Results => "results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntry {
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    #[ts(type = "number | null")]
    pub joined_at: Option<Timestamp>,
}

/// Player display name -> entry. The name is the player's identity.
pub type Players = BTreeMap<String, PlayerEntry>;

/// Player name -> question id -> chosen option index.
pub type Answers = BTreeMap<String, BTreeMap<String, usize>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct LobbyRoom {
    #[serde(default)]
    #[ts(type = "number | null")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub players: Players,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct QuizRoom {
    #[serde(default)]
    #[ts(type = "number | null")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub players: Players,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub answers: Answers,
}

impl QuizRoom {
    /// Option recorded by `player` for `question_id`, if any.
    pub fn answer_of(&self, player: &str, question_id: &str) -> Option<usize> {
        self.answers.get(player)?.get(question_id).copied()
    }

    /// Number of current players with an answer for `question_id`. Answers
    /// from names no longer in `players` are not counted, so this never
    /// exceeds `players.len()`.
    pub fn answered_count(&self, question_id: &str) -> usize {
        self.players
            .keys()
            .filter(|name| self.answer_of(name, question_id).is_some())
            .count()
    }

    /// True iff every current player has answered `question_id`.
    pub fn all_answered(&self, question_id: &str) -> bool {
        self.answered_count(question_id) >= self.players.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct ResultsRoom {
    #[serde(default)]
    #[ts(type = "number | null")]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub players: Players,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub answers: Answers,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(tag = "stage", rename_all = "lowercase")]
pub enum RoomDoc {
    Lobby(LobbyRoom),
    Quiz(QuizRoom),
    Results(ResultsRoom),
}

impl RoomDoc {
    pub fn decode(value: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }

    pub fn stage(&self) -> Stage {
        match self {
            RoomDoc::Lobby(_) => Stage::Lobby,
            RoomDoc::Quiz(_) => Stage::Quiz,
            RoomDoc::Results(_) => Stage::Results,
        }
    }

    pub fn players(&self) -> &Players {
        match self {
            RoomDoc::Lobby(r) => &r.players,
            RoomDoc::Quiz(r) => &r.players,
            RoomDoc::Results(r) => &r.players,
        }
    }

    pub fn created_at(&self) -> Option<Timestamp> {
        match self {
            RoomDoc::Lobby(r) => r.created_at,
            RoomDoc::Quiz(r) => r.created_at,
            RoomDoc::Results(r) => r.created_at,
        }
    }

    pub fn has_player(&self, name: &str) -> bool {
        self.players().contains_key(name)
    }

    pub fn as_quiz(&self) -> Option<&QuizRoom> {
        match self {
            RoomDoc::Quiz(r) => Some(r),
            _ => None,
        }
    }
}

/// Operations that build a brand new lobby with `player` as the only member.
/// The document keeps the full flat shape (`currentIndex`, `answers`) so
/// clients that read raw fields see the same layout in every stage.
pub fn new_room_ops(player: &str) -> Vec<FieldOp> {
    vec![
        FieldOp::set([FIELD_STAGE], json!(Stage::Lobby.as_str())),
        FieldOp::set([FIELD_CURRENT_INDEX], json!(0)),
        FieldOp::set([FIELD_ANSWERS], json!({})),
        FieldOp::server_timestamp([FIELD_CREATED_AT]),
        FieldOp::set([FIELD_PLAYERS, player, FIELD_SCORE], json!(0)),
        FieldOp::server_timestamp([FIELD_PLAYERS, player, FIELD_JOINED_AT]),
    ]
}

/// Serialize a players map back into its document form.
pub fn players_value(players: &Players) -> Value {
    serde_json::to_value(players).unwrap_or_else(|_| json!({}))
}

/// Serialize an answers map back into its document form.
pub fn answers_value(answers: &Answers) -> Value {
    serde_json::to_value(answers).unwrap_or_else(|_| json!({}))
}
