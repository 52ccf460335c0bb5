//! Pure projection from (latest room snapshot, local player) to what the UI
//! shows. No store access and no rendering: every front-end draws from this.

use crate::catalog::{question_at, Question};
use crate::config::QuizConfig;
use crate::room::{Players, QuizRoom, RoomDoc};

#[derive(Debug, Clone, PartialEq)]
pub enum RoomView {
    Lobby(LobbyView),
    Quiz(QuizView),
    Results(ResultsView),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LobbyView {
    /// Player names in room order (sorted)
    pub players: Vec<String>,
    pub can_start: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionState {
    Idle,
    /// Local player's pick, before reveal
    Picked,
    /// The correct option, after reveal
    Correct,
    /// Local player's incorrect pick, after reveal
    Wrong,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptionView {
    pub label: &'static str,
    pub state: OptionState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreLine {
    pub name: String,
    pub score: u32,
}

/// Inputs for the 3D viewport.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelView {
    pub url: &'static str,
    pub fit: f64,
    pub rotation: [f64; 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizView {
    pub question_id: &'static str,
    pub title: &'static str,
    pub prompt: &'static str,
    /// 1-based position
    pub number: usize,
    pub total: usize,
    pub model: ModelView,
    pub options: Vec<OptionView>,
    pub my_pick: Option<usize>,
    pub answered_count: usize,
    pub total_players: usize,
    pub all_answered: bool,
    pub scores: Vec<ScoreLine>,
}

impl QuizView {
    /// Reveal happens exactly when everyone has answered.
    pub fn revealed(&self) -> bool {
        self.all_answered
    }

    /// Label for the advance control: enabled only once everyone answered.
    pub fn next_label(&self) -> String {
        if self.all_answered {
            "Next".to_string()
        } else {
            format!("Waiting ({}/{})", self.answered_count, self.total_players)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    /// 1-based rank
    pub rank: usize,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsView {
    pub leaderboard: Vec<LeaderboardRow>,
    pub winner: Option<String>,
    pub survey_url: String,
}

pub fn project(
    room: Option<&RoomDoc>,
    player: &str,
    catalog: &'static [Question],
    config: &QuizConfig,
) -> RoomView {
    match room {
        None => RoomView::Lobby(LobbyView {
            players: Vec::new(),
            can_start: false,
        }),
        Some(RoomDoc::Lobby(lobby)) => {
            let players: Vec<String> = lobby.players.keys().cloned().collect();
            RoomView::Lobby(LobbyView {
                can_start: players.len() >= config.min_players_to_start,
                players,
            })
        }
        Some(RoomDoc::Quiz(quiz)) => match question_at(catalog, quiz.current_index) {
            Some(question) => RoomView::Quiz(project_quiz(quiz, question, player, catalog, config)),
            // A corrupt index past the catalog means the quiz is over.
            None => RoomView::Results(project_results(&quiz.players, config)),
        },
        Some(RoomDoc::Results(results)) => {
            RoomView::Results(project_results(&results.players, config))
        }
    }
}

fn project_quiz(
    quiz: &QuizRoom,
    question: &'static Question,
    player: &str,
    catalog: &[Question],
    config: &QuizConfig,
) -> QuizView {
    let answered_count = quiz.answered_count(question.id);
    let total_players = quiz.players.len();
    let all_answered = quiz.all_answered(question.id);
    let my_pick = quiz.answer_of(player, question.id);

    let options = question
        .options
        .iter()
        .enumerate()
        .map(|(i, label)| OptionView {
            label: *label,
            state: option_state(i, question.correct_index, my_pick, all_answered),
        })
        .collect();

    QuizView {
        question_id: question.id,
        title: question.title,
        prompt: question.prompt,
        number: quiz.current_index + 1,
        total: catalog.len(),
        model: ModelView {
            url: question.model_url,
            fit: question.fit_or(config.default_fit),
            rotation: question.rotation_or_default(),
        },
        options,
        my_pick,
        answered_count,
        total_players,
        all_answered,
        scores: quiz
            .players
            .iter()
            .map(|(name, p)| ScoreLine {
                name: name.clone(),
                score: p.score,
            })
            .collect(),
    }
}

fn option_state(
    index: usize,
    correct: usize,
    my_pick: Option<usize>,
    revealed: bool,
) -> OptionState {
    let picked = my_pick == Some(index);
    if revealed {
        if index == correct {
            OptionState::Correct
        } else if picked {
            OptionState::Wrong
        } else {
            OptionState::Idle
        }
    } else if picked {
        OptionState::Picked
    } else {
        OptionState::Idle
    }
}

/// Highest score first; ties keep name order.
pub fn leaderboard(players: &Players) -> Vec<LeaderboardRow> {
    let mut entries: Vec<(&String, u32)> = players.iter().map(|(n, p)| (n, p.score)).collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (name, score))| LeaderboardRow {
            rank: i + 1,
            name: name.clone(),
            score,
        })
        .collect()
}

fn project_results(players: &Players, config: &QuizConfig) -> ResultsView {
    let leaderboard = leaderboard(players);
    ResultsView {
        winner: leaderboard.first().map(|row| row.name.clone()),
        leaderboard,
        survey_url: config.survey_url.clone(),
    }
}
