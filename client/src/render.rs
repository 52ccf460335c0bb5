//! Plain-text rendering of a [`RoomView`] for the terminal front-end.

use std::fmt::Write as _;

use quizduel_shared::view::{
    LobbyView, OptionState, QuizView, ResultsView, RoomView, ScoreLine,
};

pub const HELP: &str = "\
Commands:
  join <room> <name>   enter a room (created if missing)
  start                start the quiz (needs 2 players)
  solo                 start the quiz alone
  1-4 | answer <n>     pick an option
  next                 next question (once everyone answered)
  view                 redraw
  help                 this text
  quit                 leave";

fn option_marker(state: OptionState) -> &'static str {
    match state {
        OptionState::Idle => " ",
        OptionState::Picked => ">",
        OptionState::Correct => "+",
        OptionState::Wrong => "x",
    }
}

fn score_line(scores: &[ScoreLine], me: &str) -> String {
    scores
        .iter()
        .map(|s| {
            let self_mark = if s.name == me { "*" } else { "" };
            format!("{self_mark}{} {}", s.name, s.score)
        })
        .collect::<Vec<_>>()
        .join("  ")
}

fn render_lobby(out: &mut String, lobby: &LobbyView, room: Option<&str>, me: &str) {
    match room {
        Some(room) => {
            let _ = writeln!(out, "Room {room}: lobby ({} joined)", lobby.players.len());
        }
        None => {
            let _ = writeln!(out, "Not in a room. Type: join <room> <name>");
            return;
        }
    }
    for name in &lobby.players {
        let self_mark = if name == me { "*" } else { " " };
        let _ = writeln!(out, " {self_mark} {name}");
    }
    if lobby.can_start {
        let _ = writeln!(out, "Type 'start' to begin.");
    } else {
        let _ = writeln!(out, "Waiting for another player... ('solo' to play alone)");
    }
}

fn render_quiz(out: &mut String, quiz: &QuizView, me: &str) {
    let _ = writeln!(out, "Question {}/{}: {}", quiz.number, quiz.total, quiz.title);
    let _ = writeln!(
        out,
        "[Loading 3D... {} fit {:.1}]",
        quiz.model.url, quiz.model.fit
    );
    let _ = writeln!(out, "{}", quiz.prompt);
    for (i, option) in quiz.options.iter().enumerate() {
        let _ = writeln!(out, " {} {}. {}", option_marker(option.state), i + 1, option.label);
    }
    let _ = writeln!(
        out,
        "Answered {}/{}   [{}]",
        quiz.answered_count,
        quiz.total_players,
        quiz.next_label()
    );
    let _ = writeln!(out, "Scores: {}", score_line(&quiz.scores, me));
}

fn render_results(out: &mut String, results: &ResultsView, me: &str) {
    let _ = writeln!(out, "Results");
    for row in &results.leaderboard {
        let self_mark = if row.name == me { "*" } else { " " };
        let _ = writeln!(out, " {self_mark}{}. {} {}", row.rank, row.name, row.score);
    }
    match &results.winner {
        Some(winner) => {
            let _ = writeln!(out, "Winner: {winner}");
        }
        None => {
            let _ = writeln!(out, "No players.");
        }
    }
    let _ = writeln!(out, "Feedback: {}", results.survey_url);
}

/// Render the whole screen. `room` is `None` before the first join.
pub fn render(view: &RoomView, room: Option<&str>, me: &str) -> String {
    let mut out = String::new();
    match view {
        RoomView::Lobby(lobby) => render_lobby(&mut out, lobby, room, me),
        RoomView::Quiz(quiz) => render_quiz(&mut out, quiz, me),
        RoomView::Results(results) => render_results(&mut out, results, me),
    }
    out
}
