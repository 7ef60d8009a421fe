//! Leara CLI
//!
//! Command-line access to the same store the server uses.

use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use leara::search::SearchOptions;
use leara::storage::Store;
use leara::types::*;

#[derive(Parser)]
#[command(name = "leara")]
#[command(about = "Leara assistant memory CLI")]
#[command(version)]
struct Cli {
    /// Database path
    #[arg(
        long,
        env = "LEARA_DB_PATH",
        default_value = "~/.local/share/leara/leara.db"
    )]
    db_path: String,

    /// Journal mode (wal, delete)
    #[arg(long, env = "LEARA_JOURNAL_MODE", default_value = "wal")]
    journal_mode: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Durable facts
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
    /// Actionable items
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Per-session context
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Chat history
    Chat {
        #[command(subcommand)]
        command: ChatCommand,
    },
    /// Delete memories that expired more than `days` ago
    Reap {
        #[arg(short, long, default_value = "30")]
        days: i64,
    },
    /// Show statistics
    Stats,
}

#[derive(Subcommand)]
enum MemoryCommand {
    /// Remember a fact
    Add {
        key: String,
        value: String,
        #[arg(short, long)]
        category: Option<String>,
        /// 1-5, 5 is highest
        #[arg(short, long)]
        priority: Option<i32>,
        /// Expire after this many hours
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
    /// List live memories
    List {
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long)]
        priority: Option<i32>,
        #[arg(short, long, default_value = "20")]
        limit: u32,
        #[arg(short, long, default_value = "0")]
        offset: u32,
    },
    /// Case-insensitive substring search over keys and values
    Search {
        query: String,
        #[arg(short, long)]
        category: Option<String>,
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },
    /// Get a live memory by ID
    Get { id: MemoryId },
    /// Every live memory stored under a key
    Find { key: String },
    /// Expire a memory now
    Expire { id: MemoryId },
    /// Soft-delete a memory
    Deactivate { id: MemoryId },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Create a task
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long)]
        priority: Option<i32>,
        /// RFC 3339 due date, e.g. 2024-07-01T09:00:00Z
        #[arg(long)]
        due: Option<chrono::DateTime<chrono::Utc>>,
        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,
    },
    /// List tasks
    List {
        /// pending, in_progress or completed
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Change a task's status
    Status {
        id: TaskId,
        /// pending, in_progress or completed
        status: String,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Store a value
    Set {
        session_id: String,
        key: String,
        value: String,
    },
    /// Show one key, or every key of the session
    Get {
        session_id: String,
        key: Option<String>,
    },
    /// Remove every key of the session
    Clear { session_id: String },
}

#[derive(Subcommand)]
enum ChatCommand {
    /// Append a message, starting a conversation if none is given
    Send {
        content: String,
        #[arg(short, long)]
        conversation: Option<Uuid>,
        /// Record as an assistant message
        #[arg(long)]
        assistant: bool,
    },
    /// Show conversations, or the messages of one
    History {
        conversation: Option<Uuid>,
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand ~ in path
    let db_path = shellexpand::tilde(&cli.db_path).to_string();
    let mut config = StorageConfig::new(db_path);
    config.journal_mode = cli.journal_mode.parse()?;
    let store = Store::open(config).await?;

    match cli.command {
        Commands::Memory { command } => run_memory(&store, command).await?,
        Commands::Task { command } => run_task(&store, command).await?,
        Commands::Session { command } => run_session(&store, command).await?,
        Commands::Chat { command } => run_chat(&store, command).await?,
        Commands::Reap { days } => {
            let deleted = store.reap_expired_memories(retention_days(days)?).await?;
            print_json(&serde_json::json!({ "deleted": deleted }))?;
        }
        Commands::Stats => print_json(&store.stats().await?)?,
    }

    Ok(())
}

async fn run_memory(store: &Store, command: MemoryCommand) -> anyhow::Result<()> {
    match command {
        MemoryCommand::Add {
            key,
            value,
            category,
            priority,
            ttl_hours,
        } => {
            let expires_at = match ttl_hours {
                Some(hours) => Some(
                    chrono::Utc::now()
                        .checked_add_signed(leara::types::ttl_hours(hours)?)
                        .ok_or_else(|| anyhow::anyhow!("ttl of {} hours is out of range", hours))?,
                ),
                None => None,
            };
            let input = CreateMemoryInput {
                key,
                value,
                category,
                priority,
                metadata: None,
                expires_at,
            };
            print_json(&store.create_memory(input).await?)
        }
        MemoryCommand::List {
            category,
            priority,
            limit,
            offset,
        } => {
            let page = store
                .list_memories(MemoryListOptions {
                    category,
                    priority,
                    limit: Some(limit),
                    offset: Some(offset),
                })
                .await?;
            print_json(&page)
        }
        MemoryCommand::Search {
            query,
            category,
            limit,
        } => {
            let options = SearchOptions {
                query,
                category,
                limit: Some(limit),
            };
            print_json(&store.search_memories(options).await?)
        }
        MemoryCommand::Get { id } => print_json(&store.get_memory(id).await?),
        MemoryCommand::Find { key } => print_json(&store.find_memories_by_key(&key).await?),
        MemoryCommand::Expire { id } => {
            let input = UpdateMemoryInput {
                expires_at: Some(chrono::Utc::now()),
                ..Default::default()
            };
            print_json(&store.update_memory(id, input).await?)
        }
        MemoryCommand::Deactivate { id } => print_json(&store.deactivate_memory(id).await?),
    }
}

async fn run_task(store: &Store, command: TaskCommand) -> anyhow::Result<()> {
    match command {
        TaskCommand::Add {
            title,
            description,
            priority,
            due,
            tags,
        } => {
            let input = CreateTaskInput {
                title,
                description,
                priority,
                due_date: due,
                context: Some("cli".to_string()),
                tags,
            };
            print_json(&store.create_task(input).await?)
        }
        TaskCommand::List { status, limit } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
            let page = store
                .list_tasks(TaskListOptions {
                    status,
                    limit: Some(limit),
                    ..Default::default()
                })
                .await?;
            print_json(&page)
        }
        TaskCommand::Status { id, status } => {
            print_json(&store.update_task_status_str(id, &status).await?)
        }
    }
}

async fn run_session(store: &Store, command: SessionCommand) -> anyhow::Result<()> {
    match command {
        SessionCommand::Set {
            session_id,
            key,
            value,
        } => print_json(&store.session(session_id)?.set(&key, &value).await?),
        SessionCommand::Get {
            session_id,
            key: Some(key),
        } => print_json(&store.session(session_id)?.get(&key).await?),
        SessionCommand::Get {
            session_id,
            key: None,
        } => print_json(&store.session(session_id)?.all().await?),
        SessionCommand::Clear { session_id } => {
            let removed = store.session(session_id)?.clear().await?;
            print_json(&serde_json::json!({ "deleted": removed }))
        }
    }
}

async fn run_chat(store: &Store, command: ChatCommand) -> anyhow::Result<()> {
    match command {
        ChatCommand::Send {
            content,
            conversation,
            assistant,
        } => {
            let sender = if assistant {
                Sender::Assistant
            } else {
                Sender::User
            };
            let (conversation, message) =
                store.append_message(conversation, &content, sender).await?;
            print_json(&serde_json::json!({
                "conversation": conversation,
                "message": message,
            }))
        }
        ChatCommand::History {
            conversation: Some(id),
            limit,
        } => print_json(&store.recent_messages(id, limit).await?),
        ChatCommand::History {
            conversation: None,
            limit,
        } => print_json(&store.list_conversations(limit, 0).await?),
    }
}
