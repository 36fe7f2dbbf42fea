//! Line-oriented front end on stdin/stdout.
//!
//! Plain lines are typed into the active tab followed by Enter. Lines starting
//! with `:` are console commands:
//!
//! | Command           | Effect                                   |
//! |-------------------|------------------------------------------|
//! | `:new`            | open a tab                               |
//! | `:close [N]`      | close-tab shortcut, or close tab N       |
//! | `:tab N`          | activate tab N                           |
//! | `:tabs`           | print the tab strip as JSON              |
//! | `:show [N]`       | print the visible screen                 |
//! | `:resize C R`     | resize the active tab                    |
//! | `:ctrl X`         | send Ctrl+X                              |
//! | `:send TEXT`      | write TEXT and a carriage return as-is   |
//! | `:quit`           | close every tab and exit                 |

use std::io::BufRead;
use std::time::Duration;

use tokio::sync::mpsc;

use tabterm_pty::{Key, KeyEvent, Modifiers, TabId};

use crate::commands;
use crate::state::AppState;

/// How often session notices are applied while idle.
const NOTICE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    NewTab,
    CloseTab(Option<TabId>),
    Select(TabId),
    List,
    Show(Option<TabId>),
    Resize(u16, u16),
    Control(char),
    Send(String),
    Type(String),
    Quit,
}

pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let Some(rest) = line.strip_prefix(':') else {
        return Ok(ConsoleCommand::Type(line.to_string()));
    };

    if let Some(text) = rest.strip_prefix("send ") {
        return Ok(ConsoleCommand::Send(text.to_string()));
    }

    let mut words = rest.split_whitespace();
    let command = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let parse_num = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| format!("Expected a number, got {s:?}"))
    };

    match (command, args.as_slice()) {
        ("new", []) => Ok(ConsoleCommand::NewTab),
        ("close", []) => Ok(ConsoleCommand::CloseTab(None)),
        ("close", [id]) => Ok(ConsoleCommand::CloseTab(Some(parse_num(id)?))),
        ("tab", [id]) => Ok(ConsoleCommand::Select(parse_num(id)?)),
        ("tabs", []) => Ok(ConsoleCommand::List),
        ("show", []) => Ok(ConsoleCommand::Show(None)),
        ("show", [id]) => Ok(ConsoleCommand::Show(Some(parse_num(id)?))),
        ("resize", [cols, rows]) => {
            let cols = u16::try_from(parse_num(cols)?).map_err(|e| e.to_string())?;
            let rows = u16::try_from(parse_num(rows)?).map_err(|e| e.to_string())?;
            Ok(ConsoleCommand::Resize(cols, rows))
        }
        ("ctrl", [key]) => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(ConsoleCommand::Control(c)),
                _ => Err(format!("Expected a single key, got {key:?}")),
            }
        }
        ("quit" | "q", []) => Ok(ConsoleCommand::Quit),
        _ => Err(format!("Unknown command :{rest}")),
    }
}

/// The key events typing `text` then Enter produces.
fn typed_keys(text: &str) -> impl Iterator<Item = KeyEvent> + '_ {
    text.chars()
        .map(|c| KeyEvent::plain(Key::Char(c)))
        .chain(std::iter::once(KeyEvent::plain(Key::Enter)))
}

/// Execute one command. Returns `false` when the console should exit.
async fn execute(state: &mut AppState, command: ConsoleCommand) -> Result<bool, String> {
    let modifier = state.dispatcher.modifier();
    match command {
        ConsoleCommand::NewTab => {
            let id = commands::new_terminal(state)?;
            println!("opened tab {id}");
        }
        ConsoleCommand::CloseTab(None) => {
            commands::key_down(state, &KeyEvent::new(Key::Char('w'), modifier))?;
        }
        ConsoleCommand::CloseTab(Some(id)) => commands::close_terminal(state, id)?,
        ConsoleCommand::Select(id) => commands::select_terminal(state, id)?,
        ConsoleCommand::List => {
            let tabs = commands::list_terminals(state);
            let json = serde_json::to_string_pretty(&tabs).map_err(|e| e.to_string())?;
            println!("{json}");
        }
        ConsoleCommand::Show(id) => {
            let snapshot = commands::screen(state, id)?;
            println!("--- tab {} ---", snapshot.id);
            for line in snapshot.lines {
                println!("{line}");
            }
        }
        ConsoleCommand::Resize(cols, rows) => {
            let id = state
                .registry
                .active_tab_id()
                .ok_or_else(|| "No tab is open".to_string())?;
            commands::resize_terminal(state, id, cols, rows).await?;
        }
        ConsoleCommand::Control(c) => {
            commands::key_down(state, &KeyEvent::new(Key::Char(c), Modifiers::CONTROL))?;
        }
        ConsoleCommand::Send(text) => {
            let id = state
                .registry
                .active_tab_id()
                .ok_or_else(|| "No tab is open".to_string())?;
            commands::write_input(state, id, format!("{text}\r").into_bytes()).await?;
        }
        ConsoleCommand::Type(text) => {
            for event in typed_keys(&text) {
                commands::key_down(state, &event)?;
            }
        }
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

/// Forward stdin lines from a blocking reader thread.
fn spawn_stdin_reader() -> std::io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Run the console until `:quit` or end of input.
pub async fn run(mut state: AppState) -> Result<(), String> {
    let mut lines = spawn_stdin_reader().map_err(|e| format!("Failed to read stdin: {e}"))?;
    let mut ticks = tokio::time::interval(NOTICE_INTERVAL);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                state.registry.process_notices();
                let keep_going = match parse_line(&line) {
                    Ok(command) => execute(&mut state, command).await,
                    Err(e) => Err(e),
                };
                match keep_going {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            _ = ticks.tick() => {
                state.registry.process_notices();
            }
        }
    }

    state.shutdown();
    Ok(())
}
