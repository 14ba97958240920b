//! Minimal line-oriented driver for the chat core.
//!
//! Not a UI. Exists to exercise the full stack from a terminal: type a
//! message to chat with the active conversation, or use a `/` command.

use anyhow::Result;
use app::persistence::FileStore;
use app::session::{ChatController, ReplyEvent};
use app::store::DomainStore;
use app::enrich;
use providers::gemini::GeminiClient;
use providers::ToolConfig;
use shared::{checklist, NewTask};
use std::io::Write as _;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const MODEL: &str = "gemini-1.5-flash";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let store = DomainStore::new(Box::new(FileStore::at_default_location()));
    let backend = Arc::new(GeminiClient::new(MODEL)?);
    let controller = ChatController::new(store.clone(), backend.clone());

    if store.with_state(|s| s.active_conversation_id.is_none()) {
        store.create_conversation();
    }

    println!("companion - type a message, or /help for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tools = ToolConfig::default();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
            match name {
                "quit" => break,
                "help" => print_help(),
                "new" => {
                    let convo = store.create_conversation();
                    println!("started conversation {}", convo.id);
                }
                "list" => {
                    store.with_state(|s| {
                        for (i, c) in s.conversations.iter().enumerate() {
                            let marker = if Some(&c.id) == s.active_conversation_id.as_ref() {
                                "*"
                            } else {
                                " "
                            };
                            println!("{marker} {i}: {} ({} messages)", c.title, c.history.len());
                        }
                    });
                }
                "open" => {
                    let id = arg
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| store.with_state(|s| s.conversations.get(i).map(|c| c.id.clone())));
                    match id {
                        Some(id) => match store.select_conversation(Some(&id)) {
                            Ok(()) => println!("opened {id}"),
                            Err(e) => eprintln!("error: {e}"),
                        },
                        None => eprintln!("usage: /open <index>"),
                    }
                }
                "search" => {
                    tools.web_search = !tools.web_search;
                    println!(
                        "web search {}",
                        if tools.web_search { "on" } else { "off" }
                    );
                }
                "archive" => {
                    let active = store.with_state(|s| s.active_conversation_id.clone());
                    match active {
                        Some(id) => match store.archive_toggle(&id) {
                            Ok(()) => println!("archived {id}"),
                            Err(e) => eprintln!("error: {e}"),
                        },
                        None => eprintln!("no active conversation"),
                    }
                }
                "tasks" => {
                    store.with_state(|s| {
                        for (i, t) in s.tasks.iter().enumerate() {
                            let (done, total) = checklist::counts(&t.notes);
                            if total > 0 {
                                println!("{i}: {} [{done}/{total}]", t.title);
                            } else {
                                println!("{i}: {}", t.title);
                            }
                        }
                    });
                }
                "task" => match store.create_task(NewTask {
                    title: arg.to_string(),
                    ..Default::default()
                }) {
                    Ok(task) => println!("created task {}", task.id),
                    Err(e) => eprintln!("error: {e}"),
                },
                "subtasks" => {
                    let id = arg
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| store.with_state(|s| s.tasks.get(i).map(|t| t.id.clone())));
                    match id {
                        Some(id) => {
                            match enrich::expand_subtasks(&store, backend.as_ref(), &id).await {
                                Ok(task) => println!("{}", task.notes),
                                Err(e) => eprintln!("error: {e}"),
                            }
                        }
                        None => eprintln!("usage: /subtasks <index>"),
                    }
                }
                other => eprintln!("unknown command /{other}"),
            }
            continue;
        }

        let Some(convo_id) = store.with_state(|s| s.active_conversation_id.clone()) else {
            eprintln!("no active conversation; /new to start one");
            continue;
        };
        let mut replies = match controller.send_message(&convo_id, line, tools) {
            Ok(rx) => rx,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };
        while let Some(event) = replies.recv().await {
            match event {
                ReplyEvent::Delta(delta) => {
                    print!("{delta}");
                    std::io::stdout().flush()?;
                }
                ReplyEvent::Grounding(_) => {}
                ReplyEvent::Completed(entry) => {
                    println!();
                    for chunk in &entry.grounding_chunks {
                        if let Some(uri) = &chunk.uri {
                            println!("  source: {} {uri}", chunk.title.as_deref().unwrap_or(""));
                        }
                    }
                }
                ReplyEvent::Failed(message) => println!("\n[error] {message}"),
                ReplyEvent::Suggestion(suggestion) => {
                    println!("[suggested task] {}", suggestion.title);
                }
            }
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "/new            start a conversation\n\
         /list           list conversations\n\
         /open <index>   switch conversation\n\
         /search         toggle web search for new messages\n\
         /archive        archive the active conversation\n\
         /tasks          list tasks\n\
         /task <title>   create a task\n\
         /subtasks <n>   generate a checklist for task n\n\
         /quit           exit"
    );
}
