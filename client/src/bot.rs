//! Bot player for solo play and soak testing.
//!
//! A bot is a small state machine driven by `tick()`:
//! - On a new question it picks an option and a think time from its personality
//! - When the think time runs out it answers
//! - Once everyone has answered it waits a moment and presses "next"

use quizduel_shared::catalog::{question_by_id, Question};
use quizduel_shared::view::RoomView;
use rand::Rng;

/// Bot personality affects timing and accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BotPersonality {
    /// Answers quickly (1-3s), mostly right
    Eager,
    /// Takes its time (3-8s), sometimes right
    Relaxed,
    /// Unpredictable timing (0.5-10s), often wrong
    Chaotic,
}

impl BotPersonality {
    /// Think time range for this personality (min, max) in seconds
    fn delay_range(&self) -> (f64, f64) {
        match self {
            BotPersonality::Eager => (1.0, 3.0),
            BotPersonality::Relaxed => (3.0, 8.0),
            BotPersonality::Chaotic => (0.5, 10.0),
        }
    }

    fn random_delay(&self, rng: &mut impl Rng) -> f64 {
        let (min, max) = self.delay_range();
        min + rng.gen::<f64>() * (max - min)
    }

    /// Probability of picking the correct option
    pub fn accuracy(&self) -> f64 {
        match self {
            BotPersonality::Eager => 0.8,
            BotPersonality::Relaxed => 0.6,
            BotPersonality::Chaotic => 0.35,
        }
    }
}

/// What the bot wants done this tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotAction {
    Answer(usize),
    Next,
}

/// An answer waiting for its think time to run out
#[derive(Debug, Clone)]
struct PendingAnswer {
    question_id: &'static str,
    option: usize,
    delay: f64,
}

/// Bot seat in a room
#[derive(Debug)]
pub struct QuizBot {
    pub personality: BotPersonality,
    catalog: &'static [Question],
    pending_answer: Option<PendingAnswer>,
    /// Question the bot has already asked to leave, and the wait before it does
    pending_next: Option<(&'static str, f64)>,
    next_sent_for: Option<&'static str>,
}

impl QuizBot {
    pub fn new(personality: BotPersonality, catalog: &'static [Question]) -> Self {
        Self {
            personality,
            catalog,
            pending_answer: None,
            pending_next: None,
            next_sent_for: None,
        }
    }

    fn choose_option(&self, question: &Question, rng: &mut impl Rng) -> usize {
        if rng.gen::<f64>() < self.personality.accuracy() {
            return question.correct_index;
        }
        let wrong = rng.gen_range(0..question.options.len() - 1);
        if wrong >= question.correct_index {
            wrong + 1
        } else {
            wrong
        }
    }

    /// Advance timers by `dt` seconds against the current view.
    pub fn tick(&mut self, dt: f64, view: &RoomView, rng: &mut impl Rng) -> Option<BotAction> {
        let RoomView::Quiz(quiz) = view else {
            self.pending_answer = None;
            self.pending_next = None;
            return None;
        };

        if quiz.my_pick.is_none() {
            let stale = self
                .pending_answer
                .as_ref()
                .is_some_and(|p| p.question_id != quiz.question_id);
            if stale || self.pending_answer.is_none() {
                let question = question_by_id(self.catalog, quiz.question_id)?;
                self.pending_answer = Some(PendingAnswer {
                    question_id: question.id,
                    option: self.choose_option(question, rng),
                    delay: self.personality.random_delay(rng),
                });
            }
            let pending = self.pending_answer.as_mut()?;
            pending.delay -= dt;
            if pending.delay <= 0.0 {
                let option = pending.option;
                self.pending_answer = None;
                return Some(BotAction::Answer(option));
            }
            return None;
        }

        if !quiz.all_answered || self.next_sent_for == Some(quiz.question_id) {
            return None;
        }
        let (question_id, delay) = self
            .pending_next
            .get_or_insert((quiz.question_id, self.personality.random_delay(rng) / 2.0));
        if *question_id != quiz.question_id {
            *question_id = quiz.question_id;
            *delay = self.personality.random_delay(rng) / 2.0;
        }
        *delay -= dt;
        if *delay <= 0.0 {
            self.next_sent_for = Some(quiz.question_id);
            self.pending_next = None;
            return Some(BotAction::Next);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizduel_shared::catalog::QUESTIONS;
    use quizduel_shared::config::QuizConfig;
    use quizduel_shared::room::{PlayerEntry, QuizRoom, RoomDoc};
    use quizduel_shared::view::project;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::BTreeMap;

    fn test_rng() -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(12345)
    }

    fn quiz_view(index: usize, answers: &[(&str, usize)]) -> RoomView {
        let mut quiz = QuizRoom {
            current_index: index,
            ..Default::default()
        };
        for name in ["Bot", "Ali"] {
            quiz.players.insert(name.to_string(), PlayerEntry::default());
        }
        let qid = QUESTIONS[index].id.to_string();
        for (name, pick) in answers {
            quiz.answers
                .insert(name.to_string(), BTreeMap::from([(qid.clone(), *pick)]));
        }
        project(
            Some(&RoomDoc::Quiz(quiz)),
            "Bot",
            QUESTIONS,
            &QuizConfig::default(),
        )
    }

    /// Tick in 100ms steps until the bot acts or `limit` seconds pass.
    fn run_until_action(bot: &mut QuizBot, view: &RoomView, limit: f64) -> Option<(BotAction, f64)> {
        let mut rng = test_rng();
        let mut t = 0.0;
        while t < limit {
            t += 0.1;
            if let Some(action) = bot.tick(0.1, view, &mut rng) {
                return Some((action, t));
            }
        }
        None
    }

    #[test]
    fn bot_answers_within_delay_range() {
        let mut bot = QuizBot::new(BotPersonality::Eager, QUESTIONS);
        let (action, t) = run_until_action(&mut bot, &quiz_view(0, &[]), 20.0).unwrap();
        assert!(matches!(action, BotAction::Answer(i) if i < 4));
        assert!((0.9..=3.1).contains(&t), "eager bot answered at {t}");
    }

    #[test]
    fn relaxed_bot_waits_longer() {
        let mut bot = QuizBot::new(BotPersonality::Relaxed, QUESTIONS);
        let (_, t) = run_until_action(&mut bot, &quiz_view(0, &[]), 20.0).unwrap();
        assert!(t >= 3.0);
    }

    #[test]
    fn bot_idle_outside_quiz() {
        let mut bot = QuizBot::new(BotPersonality::Eager, QUESTIONS);
        let lobby = project(None, "Bot", QUESTIONS, &QuizConfig::default());
        assert!(run_until_action(&mut bot, &lobby, 20.0).is_none());
    }

    #[test]
    fn bot_waits_for_everyone_before_next() {
        let mut bot = QuizBot::new(BotPersonality::Eager, QUESTIONS);
        // Bot answered, Ali has not.
        let waiting = quiz_view(0, &[("Bot", 2)]);
        assert!(run_until_action(&mut bot, &waiting, 20.0).is_none());

        let done = quiz_view(0, &[("Bot", 2), ("Ali", 1)]);
        let (action, _) = run_until_action(&mut bot, &done, 20.0).unwrap();
        assert_eq!(action, BotAction::Next);

        // Only once per question.
        assert!(run_until_action(&mut bot, &done, 20.0).is_none());
        let next = quiz_view(1, &[("Bot", 1), ("Ali", 1)]);
        assert_eq!(
            run_until_action(&mut bot, &next, 20.0).map(|(a, _)| a),
            Some(BotAction::Next)
        );
    }

    #[test]
    fn accuracy_tracks_personality() {
        let mut rng = test_rng();
        let question = &QUESTIONS[0];
        let correct = |p: BotPersonality, rng: &mut ChaCha8Rng| {
            let bot = QuizBot::new(p, QUESTIONS);
            (0..1000)
                .filter(|_| bot.choose_option(question, rng) == question.correct_index)
                .count()
        };
        let eager = correct(BotPersonality::Eager, &mut rng);
        let chaotic = correct(BotPersonality::Chaotic, &mut rng);
        assert!(eager > 700, "eager correct {eager}/1000");
        assert!(chaotic < 450, "chaotic correct {chaotic}/1000");
    }

    #[test]
    fn wrong_picks_stay_in_range() {
        let mut rng = test_rng();
        let bot = QuizBot::new(BotPersonality::Chaotic, QUESTIONS);
        for question in QUESTIONS {
            for _ in 0..50 {
                assert!(bot.choose_option(question, &mut rng) < question.options.len());
            }
        }
    }

    #[test]
    fn personalities_parse_from_cli_names() {
        use clap::ValueEnum;
        for personality in BotPersonality::value_variants() {
            let value = personality.to_possible_value().unwrap();
            assert_eq!(BotPersonality::from_str(value.get_name(), true), Ok(*personality));
        }
        assert!(BotPersonality::from_str("random", true).is_err());
    }
}
