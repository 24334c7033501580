mod config;
mod view;

use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use client_core::{
    ChatClient, ClientEvent, Draft, FileProfileStore, GateOutcome, HttpChatBackend, SendOutcome,
    SendRejection,
};
use shared::domain::{ChatId, MessageId, UserProfile};
use tokio::{
    io::{self, AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::broadcast::error::RecvError,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use view::Input;

#[derive(Parser, Debug)]
#[command(name = "chat-terminal", about = "Terminal client for the chat backend")]
struct Cli {
    /// Config file; `client.toml` in the working directory when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    classifier_url: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
    #[arg(long)]
    warm_up_cycles: Option<u32>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and remember it as the active profile.
    Register { username: String },
    /// Sign in as an existing user and remember the profile.
    Login { username: String },
    Whoami,
    Search { query: Option<String> },
    Chats,
    /// Start (or reuse) a chat with another user.
    Start { username: String },
    Open { chat_id: String },
}

type InputLines = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = config::load_settings(cli.config.as_deref())?;
    if let Some(v) = cli.server_url {
        settings.server_url = v;
    }
    if let Some(v) = cli.classifier_url {
        settings.classifier_url = Some(v);
    }
    if let Some(v) = cli.log_level {
        settings.log_level = v;
    }
    if let Some(v) = cli.warm_up_cycles {
        settings.warm_up_cycles = v;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let backend = HttpChatBackend::new(&settings.server_url, settings.request_timeout())?;
    let client = ChatClient::new_with_dependencies(
        Arc::new(backend),
        settings.classifier()?,
        Arc::new(FileProfileStore::new(settings.profile_path.clone())),
        settings.sync_settings(),
    );
    let mut lines = BufReader::new(io::stdin()).lines();

    match cli.command {
        Command::Register { username } => {
            let profile = client.register(&username).await?;
            println!("registered as {}", profile.username);
        }
        Command::Login { username } => {
            let profile = client.sign_in(&username).await?;
            println!("signed in as {}", profile.username);
        }
        Command::Whoami => {
            let profile = resume(&client).await?;
            print_profile(&profile);
        }
        Command::Search { query } => {
            resume(&client).await?;
            let query = match query {
                Some(query) => query,
                None => prompt(&mut lines, "search for:").await?.unwrap_or_default(),
            };
            let users = client.search_users(&query).await?;
            if users.is_empty() {
                println!("no users match '{}'", query.trim());
            }
            for user in users {
                println!("{}", user.username);
            }
        }
        Command::Chats => {
            resume(&client).await?;
            let chats = client.list_chats().await;
            if chats.is_empty() {
                println!("no chats yet; use `start <username>`");
            }
            let now = Utc::now();
            for chat in chats {
                println!("{}", view::chat_row(&chat, now));
            }
        }
        Command::Start { username } => {
            resume(&client).await?;
            let chat_id = client.start_chat(&username).await?;
            println!("chat {chat_id} with {}", username.trim());
        }
        Command::Open { chat_id } => {
            resume(&client).await?;
            run_chat(&client, ChatId::new(chat_id), &mut lines).await?;
        }
    }

    Ok(())
}

async fn resume(client: &ChatClient) -> Result<UserProfile> {
    client
        .resume()
        .await?
        .context("no saved profile; run `register <username>` or `login <username>` first")
}

fn print_profile(profile: &UserProfile) {
    println!("{}", profile.username);
    if let Some(avatar) = &profile.avatar {
        println!("avatar: {avatar}");
    }
    if profile.created_at > 0 {
        println!("member for {}", view::relative_label(Utc::now(), profile.created_at));
    }
}

async fn prompt(lines: &mut InputLines, question: &str) -> Result<Option<String>> {
    println!("{question}");
    Ok(lines.next_line().await?)
}

async fn run_chat(client: &Arc<ChatClient>, chat_id: ChatId, lines: &mut InputLines) -> Result<()> {
    let Some(chat) = client.chat(&chat_id).await else {
        bail!("unknown chat {chat_id}; run `chats` to list yours");
    };
    println!("chat with {} (/image <ref>, /retry, /quit)", chat.counterpart);
    let mut shown = HashSet::new();
    for message in &chat.messages {
        shown.insert(message.id.clone());
        println!("{}", view::message_line(message, &chat.current_user));
    }

    let mut events = client.subscribe_events();
    let refresher = client.spawn_list_refresher();
    client.open_chat(&chat_id).await?;
    client.mark_read(&chat_id).await;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::ChatUpdated { chat_id: updated, .. }) if updated == chat_id => {
                    print_new_messages(client, &chat_id, &mut shown).await;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "terminal: event stream lagged");
                    print_new_messages(client, &chat_id, &mut shown).await;
                }
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match view::parse_input(&line) {
                    Input::Quit => break,
                    Input::Empty => {}
                    Input::Unknown(command) => println!("unknown command {command}"),
                    Input::Text(text) => {
                        let outcome = client.send(&chat_id, Draft::text(text)).await?;
                        report_send(&outcome);
                    }
                    Input::Retry => retry_last(client, &chat_id).await?,
                    Input::Image(image_ref) => send_image(client, &chat_id, &image_ref, lines).await?,
                }
                print_new_messages(client, &chat_id, &mut shown).await;
            }
        }
    }

    client.close_chat().await;
    refresher.stop();
    Ok(())
}

async fn print_new_messages(client: &ChatClient, chat_id: &ChatId, shown: &mut HashSet<MessageId>) {
    let Some(chat) = client.chat(chat_id).await else {
        return;
    };
    for message in &chat.messages {
        if shown.insert(message.id.clone()) {
            println!("{}", view::message_line(message, &chat.current_user));
        }
    }
    client.mark_read(chat_id).await;
}

fn report_send(outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Delivered(_) => {}
        SendOutcome::Rejected(SendRejection::InFlight) => {
            println!("! still sending the previous message");
        }
        SendOutcome::Rejected(SendRejection::EmptyDraft) => {}
        SendOutcome::Failed { draft, .. } => {
            let label = draft.image_ref.as_deref().unwrap_or(&draft.content);
            println!("! not sent: {label} (type /retry)");
        }
    }
}

async fn retry_last(client: &ChatClient, chat_id: &ChatId) -> Result<()> {
    let Some(failed) = client.failed_sends(chat_id).await.pop() else {
        println!("nothing to retry");
        return Ok(());
    };
    if let Some(outcome) = client.retry_failed(chat_id, failed.id).await? {
        report_send(&outcome);
    }
    Ok(())
}

async fn send_image(
    client: &ChatClient,
    chat_id: &ChatId,
    image_ref: &str,
    lines: &mut InputLines,
) -> Result<()> {
    match client.submit_image(chat_id, image_ref).await? {
        GateOutcome::Sent(outcome) => report_send(&outcome),
        GateOutcome::Busy => println!("! an image is already waiting for a decision"),
        GateOutcome::AwaitingConfirmation(pending) => {
            let answer = prompt(lines, &view::flagged_prompt(&pending)).await?;
            if answer.as_deref().is_some_and(view::is_yes) {
                if let Some(outcome) = client.confirm_pending(chat_id).await? {
                    report_send(&outcome);
                }
            } else {
                client.cancel_pending(chat_id).await;
                println!("image discarded");
            }
        }
    }
    Ok(())
}
