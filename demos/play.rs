//! # Terminal Play Example
//!
//! Plays one beer game from the terminal:
//!
//! 1. Resolve the player identity from a cookie file
//! 2. Connect to the server the way a page served from `BEER_GAME_ORIGIN` would
//! 3. Join the game and print every view the server drives
//! 4. Read commands from stdin; shut down on Ctrl+C or when the game ends
//!
//! ## Running
//!
//! ```sh
//! echo "user-id=abc123" > cookies.txt
//! cargo run --example play -- my-game cookies.txt
//!
//! # Override the server origin:
//! BEER_GAME_ORIGIN=https://beer.example.com cargo run --example play -- my-game cookies.txt
//!
//! # The reference Go server never answers `ping`; turn keep-alive off for it:
//! BEER_GAME_KEEP_ALIVE=off cargo run --example play -- my-game cookies.txt
//! ```
//!
//! `BEER_GAME_KEEP_ALIVE` takes `off` or a ping interval in milliseconds
//! (default 1000). With keep-alive on, a ping the server leaves unanswered
//! drops and re-establishes the streaming channel.
//!
//! Commands: a number submits a shipment while playing; in the lobby use
//! `start`, `leave`, `kick <player-id>`, `role <value>` or `set <name> <value>`.

use std::time::Duration;

use beer_game_client::{ClientConfig, Entry, GameController, GraphQlClient, IdentityResolver};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Default origin when `BEER_GAME_ORIGIN` is not set.
const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Default ping interval when `BEER_GAME_KEEP_ALIVE` is not set.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_millis(1000);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for wire-level output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let mut args = std::env::args().skip(1);
    let game_id = args.next().ok_or("usage: play <game-id> [cookie-file]")?;
    let cookie_file = args.next().unwrap_or_else(|| "cookies.txt".to_string());
    let origin = std::env::var("BEER_GAME_ORIGIN").unwrap_or_else(|_| DEFAULT_ORIGIN.to_string());
    let keep_alive = match std::env::var("BEER_GAME_KEEP_ALIVE") {
        Ok(value) if value.eq_ignore_ascii_case("off") => None,
        Ok(value) => Some(Duration::from_millis(value.parse()?)),
        Err(_) => Some(DEFAULT_KEEP_ALIVE),
    };

    let identity = match IdentityResolver::load(&cookie_file).entry() {
        Entry::Ready(identity) => identity,
        Entry::AcquireIdentity => {
            eprintln!("No `user-id` in {cookie_file}; create a player first.");
            return Ok(());
        }
    };

    // ── Connect ─────────────────────────────────────────────────────
    let config = ClientConfig::for_origin(&origin).with_keep_alive(keep_alive);
    tracing::info!(
        http = %config.http_url,
        ws = %config.ws_url,
        keep_alive = ?config.keep_alive,
        "connecting"
    );
    let mut client = GraphQlClient::connect(config);
    let handle = client.handle();

    if !handle.game_exists(game_id.clone()).await? {
        eprintln!("Game '{game_id}' does not exist.");
        client.shutdown().await;
        return Ok(());
    }

    let mut controller = GameController::start(&handle, game_id, identity)?;
    println!("{}", controller.view());

    // ── Event loop ──────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            view = controller.next() => match view {
                Some(view) => println!("\n{view}"),
                None => {
                    tracing::info!("game subscription ended");
                    break;
                }
            },

            line = lines.next_line() => match line? {
                Some(line) => command(&mut controller, line.trim()),
                None => break,
            },

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    // ── Shutdown ────────────────────────────────────────────────────
    drop(controller);
    client.shutdown().await;
    Ok(())
}

fn command(controller: &mut GameController, line: &str) {
    let mut words = line.split_whitespace();
    let sent = match (words.next(), words.next(), words.next()) {
        (Some("start"), None, None) => controller.start_game().is_some(),
        (Some("leave"), None, None) => controller.leave().is_some(),
        (Some("kick"), Some(player), None) => controller.remove_player(player).is_some(),
        (Some("role"), Some(value), None) => match value.parse() {
            Ok(role) => controller.change_role(role).is_some(),
            Err(_) => false,
        },
        (Some("set"), Some(name), Some(value)) => {
            controller.edit_setting(name, value) && controller.commit_setting(name).is_some()
        }
        (Some(quantity), None, None) => {
            controller.input_shipment(quantity) && controller.submit_shipment().is_some()
        }
        _ => false,
    };
    if !sent {
        eprintln!("'{line}' is not available right now");
    }
}
