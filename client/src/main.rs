use std::time::Duration;

use clap::Parser;
use quizduel_client::bot::{BotAction, BotPersonality, QuizBot};
use quizduel_client::command::run_command;
use quizduel_client::input::{parse_command, Command};
use quizduel_client::render::{render, HELP};
use quizduel_client::session::{RoomSession, SessionError, WriteStrategy};
use quizduel_client::store::{DocumentStore, RemoteStore};
use quizduel_shared::catalog::{unique_model_urls, validate_catalog, QUESTIONS};
use quizduel_shared::config::QuizConfig;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncBufReadExt, BufReader};

const BOT_TICK: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "quizduel", version, about = "Two-player anatomy quiz over a shared room document")]
struct Cli {
    /// Document store address, e.g. ws://127.0.0.1:9002/ws
    #[arg(long, env = "QUIZDUEL_STORE_URL")]
    store_url: Option<String>,
    /// Room code to join at startup
    #[arg(long, env = "QUIZDUEL_ROOM")]
    room: Option<String>,
    /// Player name to join with
    #[arg(long, env = "QUIZDUEL_NAME")]
    name: Option<String>,
    #[arg(long, value_enum, default_value_t = WriteStrategy::PerKey)]
    strategy: WriteStrategy,
    /// Let a bot answer for this player
    #[arg(long, value_enum)]
    bot: Option<BotPersonality>,
    /// Seed for the bot's choices
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so the rendered room stays readable on stdout.
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    let config = QuizConfig::default();
    if let Err(e) = config.validate().and_then(|_| validate_catalog(QUESTIONS)) {
        eprintln!("Invalid quiz configuration: {}", e);
        std::process::exit(1);
    }

    let Some(store_url) = cli.store_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        eprintln!("No document store configured: set QUIZDUEL_STORE_URL or pass --store-url");
        std::process::exit(1);
    };

    for url in unique_model_urls(QUESTIONS) {
        tracing::debug!("Model to preload: {}", url);
    }

    let store = match RemoteStore::connect(store_url).await {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", store_url, e);
            std::process::exit(1);
        }
    };

    let mut session = RoomSession::new(store, QUESTIONS, config, cli.strategy);
    let mut bot = cli.bot.map(|personality| {
        tracing::info!("Bot enabled ({:?})", personality);
        QuizBot::new(personality, QUESTIONS)
    });
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed.unwrap_or_else(rand::random));

    if let (Some(room), Some(name)) = (cli.room.as_deref(), cli.name.as_deref()) {
        let join = Command::Join {
            room: room.to_string(),
            name: name.to_string(),
        };
        report(run_command(&mut session, join).await);
    } else {
        println!("{}", HELP);
    }
    let mut last_screen = redraw(&session, None);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut bot_tick = tokio::time::interval(BOT_TICK);
    bot_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read input: {}", e);
                        break;
                    }
                };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(Command::View)) => last_screen = redraw(&session, None),
                    Ok(Some(Command::Help)) => println!("{}", HELP),
                    Ok(Some(command)) => report(run_command(&mut session, command).await),
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                }
            }

            alive = session.next_change() => {
                if !alive {
                    eprintln!("Lost connection to the document store");
                    std::process::exit(1);
                }
            }

            _ = bot_tick.tick(), if bot.is_some() && session.room().is_some() => {
                let view = session.view();
                let action = bot
                    .as_mut()
                    .and_then(|b| b.tick(BOT_TICK.as_secs_f64(), &view, &mut rng));
                if let Some(action) = action {
                    let command = match action {
                        BotAction::Answer(option) => Command::Answer(option),
                        BotAction::Next => Command::Next,
                    };
                    report(run_command(&mut session, command).await);
                }
            }
        }
        last_screen = redraw(&session, Some(&last_screen));
    }

    session.leave();
}

/// Print the screen if it differs from `last`.
fn redraw<S: DocumentStore>(session: &RoomSession<S>, last: Option<&str>) -> String {
    let screen = render(&session.view(), session.room(), session.player().unwrap_or_default());
    if last != Some(screen.as_str()) {
        println!("\n{}", screen);
    }
    screen
}

fn report(result: Result<Option<String>, SessionError>) {
    match result {
        Ok(Some(message)) => println!("{}", message),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Command failed: {}", e);
            println!("Error: {}", e);
        }
    }
}
