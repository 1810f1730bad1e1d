use std::io::{self as stdio, BufRead};

use chrono::Utc;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};

use counsel_chat::chat::{Conversation, ConversationUpdate, ConversationViewModel};
use counsel_chat::config::{self, AppConfig};
use counsel_chat::network::{GossipConnector, SupervisedConnector};
use counsel_chat::session::{LocalUser, Role, SessionContext};
use counsel_chat::storage::FileSecretStore;
use counsel_chat::{ChatError, Result};

#[derive(Parser)]
#[command(
    name = "counsel_chat",
    version,
    about = "Peer-to-peer counselling chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a session for USER so later commands run as them
    SignIn {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        /// Sign in on the counsellor side
        #[arg(long)]
        counsellor: bool,
    },
    /// Forget the stored session
    SignOut,
    /// Grant campus access from scanned codes read on stdin (first one wins)
    Campus,
    /// Open a conversation and chat interactively
    Chat {
        #[arg(long)]
        conversation: String,
        /// Display name for the other party
        #[arg(long)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    let secrets = FileSecretStore::new(&app_config.secrets_path);

    match cli.command {
        Command::SignIn {
            user,
            name,
            counsellor,
        } => {
            let display_name = name.unwrap_or_else(|| user.clone());
            let role = if counsellor {
                Role::Counsellor
            } else {
                Role::Student
            };
            let user = LocalUser::new(user, display_name).with_role(role);
            let session = SessionContext::sign_in(&secrets, user)?;
            println!("Signed in as {} ({})", session.user_id(), session.role());
        }
        Command::SignOut => match SessionContext::restore(&secrets)? {
            Some(session) => session.sign_out(&secrets)?,
            None => println!("No active session"),
        },
        Command::Campus => {
            let mut session = require_session(&secrets)?;
            let scan = stdio::stdin().lock().lines().map_while(|line| line.ok());
            let campus_id = session.grant_campus_access(&secrets, scan)?;
            println!("Campus access granted: {campus_id}");
        }
        Command::Chat { conversation, name } => {
            let session = require_session(&secrets)?;
            run_chat(&app_config, &session, conversation, name).await?;
        }
    }

    Ok(())
}

fn require_session(secrets: &FileSecretStore) -> Result<SessionContext> {
    SessionContext::restore(secrets)?
        .ok_or_else(|| ChatError::Session("not signed in; run `sign-in` first".to_string()))
}

async fn run_chat(
    app_config: &AppConfig,
    session: &SessionContext,
    conversation_id: String,
    display_name: Option<String>,
) -> Result<()> {
    let display_name = display_name.unwrap_or_else(|| conversation_id.clone());
    let conversation = Conversation::new(conversation_id.clone(), display_name);
    let mut view_model = ConversationViewModel::new(conversation, session, app_config.delivery);

    let channel_config = app_config.channel_config(&conversation_id);
    println!("Waiting for a peer on `{conversation_id}`...");
    let connected = if app_config.reconnect.enabled {
        let connector =
            SupervisedConnector::new(GossipConnector::new(), app_config.reconnect.backoff());
        view_model.connect(&connector, &channel_config).await
    } else {
        view_model.connect(&GossipConnector::new(), &channel_config).await
    };
    match connected {
        Ok(()) => println!("Connected. /read marks messages read, /list shows a summary, /quit leaves."),
        Err(err) => println!("No peer reachable ({err}); messages stay local."),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_input(&mut view_model, line.trim_end()) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            update = view_model.process_next() => {
                if let Some(update) = update {
                    render_update(&view_model, &update);
                }
            }
        }
    }

    view_model.close();
    Ok(())
}

/// Returns `false` when the user asked to leave.
fn handle_input(view_model: &mut ConversationViewModel, line: &str) -> bool {
    match line {
        "/quit" => return false,
        "/read" => {
            let count = view_model.mark_read();
            println!("Marked {count} messages read");
        }
        "/list" => {
            let summary = view_model.summary();
            let when = summary
                .relative_time(Utc::now())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{} [{}] {} unread, last: {} ({when})",
                summary.name,
                summary.id,
                summary.unread_count,
                summary.last_message.as_deref().unwrap_or("<none>")
            );
        }
        text => match view_model.send_text(text) {
            Ok(message_id) => log::debug!("Queued {message_id}"),
            Err(ChatError::EmptyInput) => {}
            Err(err) => println!("! {err}"),
        },
    }
    true
}

fn render_update(view_model: &ConversationViewModel, update: &ConversationUpdate) {
    match update {
        ConversationUpdate::Appended(message_id) => {
            if let Some(message) = view_model.conversation().store().get(message_id) {
                let sender = if message.sender_id() == view_model.local_sender_id() {
                    "you"
                } else {
                    message.sender_id()
                };
                match view_model.flag(message_id) {
                    Some(flag) => println!("[{sender}] {} (!{flag})", message.text()),
                    None => println!("[{sender}] {}", message.text()),
                }
            }
        }
        ConversationUpdate::StatusChanged { message_id, status } => {
            println!("  {message_id} {status}");
        }
        ConversationUpdate::SendFailed(message_id) => {
            println!("! {message_id} was not delivered; kept locally");
        }
        ConversationUpdate::Ignored => {}
    }
}
