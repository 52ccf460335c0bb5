//! Runs a parsed [`Command`] against a room session and turns the outcome
//! into a one-line notice for the player.

use quizduel_shared::view::RoomView;

use crate::input::Command;
use crate::session::{
    Advance, AnswerOutcome, JoinOutcome, RoomSession, SessionError, StartOutcome,
};
use crate::store::DocumentStore;

/// `Ok(None)` when the redrawn screen says everything there is to say.
///
/// A recorded answer only gets a neutral notice: whether it was right shows up
/// on the quiz screen once everyone has answered.
pub async fn run_command<S: DocumentStore>(
    session: &mut RoomSession<S>,
    command: Command,
) -> Result<Option<String>, SessionError> {
    let message = match command {
        Command::Join { room, name } => match session.join_room(&room, &name).await? {
            JoinOutcome::Created => format!("Created room {room}"),
            JoinOutcome::Joined => format!("Joined room {room}"),
            JoinOutcome::Rejoined => format!("Rejoined room {room} as {name}"),
        },
        Command::Start { force } => match session.start_quiz(force).await? {
            StartOutcome::Started => return Ok(None),
            StartOutcome::NeedMorePlayers { present, required } => {
                format!("Need {required} players to start ({present} here). Type 'solo' to play alone.")
            }
            StartOutcome::AlreadyStarted => "The quiz has already started".to_string(),
        },
        Command::Answer(option) => {
            if let RoomView::Quiz(quiz) = session.view() {
                if option >= quiz.options.len() {
                    return Ok(Some(format!("Pick an option from 1 to {}", quiz.options.len())));
                }
            }
            match session.submit_answer(option).await? {
                AnswerOutcome::Recorded { .. } => format!("Answer {} locked in", option + 1),
                AnswerOutcome::AlreadyAnswered => "You already answered this question".to_string(),
                AnswerOutcome::Stale => "Too late, the question changed".to_string(),
            }
        }
        Command::Next => {
            if let RoomView::Quiz(quiz) = session.view() {
                if !quiz.all_answered {
                    return Ok(Some(quiz.next_label()));
                }
            }
            match session.next_question().await? {
                Advance::Question(_) | Advance::Results => return Ok(None),
                Advance::Stale => "Already moved on".to_string(),
            }
        }
        Command::View | Command::Help | Command::Quit => return Ok(None),
    };
    Ok(Some(message))
}
