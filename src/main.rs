//! wordlink - play a word game with a friend over a P2P session

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rand::seq::SliceRandom;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

use wordlink::network::{
    ConnectionStatus, SessionConfig, SessionDriver, SessionHandle, SessionManager,
    SessionNotification, SessionSnapshot, WsPeerFactory,
};
use wordlink::protocol::{
    GameState, GameStatus, LetterStatus, StandardRules, WordRules, MAX_GUESSES,
};

/// Answers the host picks from
const ANSWERS: &[&str] = &[
    "CRANE", "SLATE", "PLANT", "GHOST", "BRICK", "FLAME", "SHINE", "TRAIN", "WORDS", "LIGHT",
];

#[derive(Parser)]
#[command(name = "wordlink")]
#[command(about = "Play a word game with a friend over a P2P session")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Rendezvous server URL (e.g., wss://example.com)
    #[arg(
        short,
        long,
        global = true,
        env = "WORDLINK_SERVER",
        default_value = "ws://127.0.0.1:8080"
    )]
    server: String,

    /// Session configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a new game
    Host {
        /// Require this PIN (4-8 digits) from the viewer
        #[arg(long)]
        pin: Option<String>,
    },

    /// Join a hosted game as viewer
    Join {
        /// Session code shown by the host
        code: String,

        /// PIN, if the host set one
        #[arg(long)]
        pin: Option<String>,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let factory = WsPeerFactory::new(&cli.server, events_tx)?;
    let manager = SessionManager::new(config, factory);
    let (driver, handle, notifications) = SessionDriver::new(manager, events_rx);
    let driver_task = driver.spawn();

    let result = match cli.command {
        Commands::Host { pin } => run_host(&handle, pin.as_deref()).await,
        Commands::Join { code, pin } => run_join(&handle, notifications, &code, pin.as_deref()).await,
    };

    handle.shutdown();
    let _ = driver_task.await;
    result
}

async fn run_host(handle: &SessionHandle, pin: Option<&str>) -> Result<()> {
    let rules = StandardRules;
    let answer = ANSWERS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("CRANE");
    let mut state = GameState::new(answer);

    let code = handle.host_game(pin).await?;
    handle.send_game_state(state.clone()).await?;

    println!("\nSession code: {}", code);
    if let Some(pin) = pin {
        println!("PIN:          {}", pin);
    }
    println!("\nType a guess, /accept or /reject a suggestion, /quit to leave.\n");

    let mut snapshots = handle.subscribe();
    let mut last = SessionSnapshot::default();
    let mut stdin_reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report_changes(&last, &snapshot);
                if snapshot.connection_status == ConnectionStatus::Error {
                    break;
                }
                last = snapshot;
            }
            line_result = stdin_reader.next_line() => {
                let line = match line_result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        break;
                    }
                };

                let word = match line.trim() {
                    "" => continue,
                    "/quit" => break,
                    "/reject" => {
                        handle.reject_suggestion();
                        continue;
                    }
                    "/accept" => match handle.accept_suggestion().await {
                        Some(word) => word,
                        None => {
                            println!("No pending suggestion.");
                            continue;
                        }
                    },
                    guess => guess.to_ascii_uppercase(),
                };

                if state.game_status != GameStatus::Playing {
                    println!("Game over.");
                    continue;
                }
                if let Err(e) = apply_guess(&mut state, &word, &rules) {
                    println!("{}", e);
                    continue;
                }
                print_board(&state);
                handle.send_game_state(state.clone()).await?;
            }
        }
    }

    handle.leave_session();
    Ok(())
}

async fn run_join(
    handle: &SessionHandle,
    mut notifications: mpsc::UnboundedReceiver<SessionNotification>,
    code: &str,
    pin: Option<&str>,
) -> Result<()> {
    handle.join_game(code, pin).await?;
    println!("\nJoining {}...", code);
    println!("Type a word to suggest it, /clear to withdraw, /quit to leave.\n");

    let mut snapshots = handle.subscribe();
    let mut last = SessionSnapshot::default();
    let mut stdin_reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            Some(note) = notifications.recv() => {
                match note {
                    SessionNotification::GameState(state) => print_board(&state),
                    SessionNotification::SuggestionResponse(response) => {
                        let verdict = if response.accepted { "accepted" } else { "rejected" };
                        println!("Host {} {}", verdict, response.word);
                    }
                }
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report_changes(&last, &snapshot);
                if snapshot.connection_status == ConnectionStatus::Error {
                    bail!(snapshot.error_message.unwrap_or_else(|| "Session failed".into()));
                }
                last = snapshot;
            }
            line_result = stdin_reader.next_line() => {
                let line = match line_result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        break;
                    }
                };

                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/clear" => {
                        if let Err(e) = handle.clear_suggestion().await {
                            println!("{}", e);
                        }
                    }
                    word => {
                        if let Err(e) = handle.send_suggestion(word).await {
                            println!("{}", e);
                        }
                    }
                }
            }
        }
    }

    handle.leave_session();
    Ok(())
}

/// Score a guess and advance the game
fn apply_guess(state: &mut GameState, word: &str, rules: &dyn WordRules) -> Result<()> {
    if !rules.is_valid_word(word) {
        bail!("Not a valid word.");
    }
    let Some(answer) = state.solution.clone() else {
        bail!("No answer set");
    };

    let evaluation = rules.letter_statuses(word, &answer);
    let solved = evaluation.iter().all(|s| *s == LetterStatus::Correct);

    state.guesses.push(word.to_string());
    state.evaluations.push(evaluation);
    state.current_guess.clear();

    if solved {
        state.game_status = GameStatus::Won;
    } else if state.guesses.len() >= MAX_GUESSES {
        state.game_status = GameStatus::Lost;
    }
    Ok(())
}

fn print_board(state: &GameState) {
    println!();
    for (guess, evaluation) in state.guesses.iter().zip(&state.evaluations) {
        let row: Vec<String> = guess
            .chars()
            .zip(evaluation)
            .map(|(c, status)| match status {
                LetterStatus::Correct => format!("[{}]", c),
                LetterStatus::Present => format!("({})", c),
                LetterStatus::Absent => format!(" {} ", c),
            })
            .collect();
        println!("  {}", row.join(""));
    }
    for _ in state.guesses.len()..MAX_GUESSES {
        println!("   .  .  .  .  . ");
    }
    match state.game_status {
        GameStatus::Playing => {}
        GameStatus::Won => println!("\n  Solved!"),
        GameStatus::Lost => println!("\n  Out of guesses."),
    }
    println!();
}

fn report_changes(last: &SessionSnapshot, now: &SessionSnapshot) {
    if now.partner_present != last.partner_present {
        if now.partner_present {
            println!("Partner connected.");
        } else {
            println!("Partner left.");
        }
    }
    if now.status_message != last.status_message {
        if let Some(status) = &now.status_message {
            println!("{}", status);
        }
    }
    if now.pending_suggestion != last.pending_suggestion {
        if let Some(word) = &now.pending_suggestion {
            println!("Viewer suggests {} (/accept or /reject)", word);
        }
    }
    if now.session_code != last.session_code && last.session_code.is_some() {
        if let Some(code) = &now.session_code {
            println!("Session code is now {}", code);
        }
    }
    if now.error_message != last.error_message {
        if let Some(error) = &now.error_message {
            println!("{}", error);
        }
    }
}
