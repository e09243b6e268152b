//! ReelRoom realtime CLI.
//!
//! Thin operator tool over the `realtime` session layer: probe the server,
//! join a project and stream session events, post and resolve comments,
//! take the advisory lock, and watch processing jobs over push or poll.

use std::time::Duration;

use clap::{Parser, Subcommand};
use realtime::{
    ClientConfig, Connection, Credentials, HttpStatusSource, ProcessingWatcher, SessionEvent,
    SessionStore, poll_status,
};
use wire::{JobStatus, ProcessingUpdate, ServerEvent};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Connect(#[from] realtime::ConnectError),
    #[error(transparent)]
    Request(#[from] realtime::RequestError),
    #[error(transparent)]
    Session(#[from] realtime::SessionError),
    #[error(transparent)]
    Poll(#[from] realtime::PollError),
    #[error("event stream ended unexpectedly")]
    StreamEnded,
}

#[derive(Parser, Debug)]
#[command(name = "reelroom-cli", about = "ReelRoom realtime session CLI")]
struct Cli {
    /// WebSocket endpoint of the realtime server.
    #[arg(long, env = "REELROOM_URL", default_value = "ws://127.0.0.1:3001/ws")]
    url: String,

    /// HTTP base URL, used by `status --poll`.
    #[arg(long, env = "REELROOM_API_URL", default_value = "http://127.0.0.1:3001")]
    api_url: String,

    #[arg(long, env = "REELROOM_USER_ID")]
    user_id: String,

    #[arg(long, env = "REELROOM_USERNAME")]
    username: String,

    #[arg(long, env = "REELROOM_TOKEN")]
    token: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure request/ack round-trip latency.
    Ping,
    /// Join a project and stream session events until interrupted.
    Join { project_id: String },
    /// Add a comment, optionally anchored to a video timestamp in seconds.
    Comment {
        project_id: String,
        content: String,
        #[arg(long)]
        at: Option<f64>,
    },
    /// Mark a comment resolved.
    Resolve {
        project_id: String,
        comment_id: String,
    },
    /// Take the advisory project lock.
    Lock { project_id: String },
    /// Release the advisory project lock.
    Unlock { project_id: String },
    /// Watch a processing job until it reaches a terminal status.
    Status {
        project_id: String,
        /// Poll the HTTP status endpoint instead of subscribing for pushes.
        #[arg(long)]
        poll: bool,
        /// Poll interval in seconds.
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let credentials = Credentials::new(&cli.user_id, &cli.username, &cli.token);

    match &cli.command {
        Command::Ping => run_ping(&cli, credentials).await,
        Command::Join { project_id } => run_join(&cli, credentials, project_id).await,
        Command::Comment { project_id, content, at } => {
            let store = join_session(&cli, credentials, project_id).await?;
            store.add_comment(content.clone(), *at).await?;
            eprintln!("comment posted");
            store.leave_project();
            Ok(())
        }
        Command::Resolve { project_id, comment_id } => {
            let store = join_session(&cli, credentials, project_id).await?;
            store.resolve_comment(comment_id.clone()).await?;
            eprintln!("comment {comment_id} resolved");
            store.leave_project();
            Ok(())
        }
        Command::Lock { project_id } => {
            let store = join_session(&cli, credentials, project_id).await?;
            store.lock_project().await?;
            eprintln!("project locked");
            store.leave_project();
            Ok(())
        }
        Command::Unlock { project_id } => {
            let store = join_session(&cli, credentials, project_id).await?;
            store.unlock_project().await?;
            eprintln!("project unlocked");
            store.leave_project();
            Ok(())
        }
        Command::Status { project_id, poll, interval } => {
            if *poll {
                run_status_poll(&cli, project_id, Duration::from_secs(*interval)).await
            } else {
                run_status_push(&cli, credentials, project_id).await
            }
        }
    }
}

async fn run_ping(cli: &Cli, credentials: Credentials) -> Result<(), CliError> {
    let connection = Connection::new(ClientConfig::new(&cli.url));
    connection.connect(credentials).await?;
    let elapsed = connection.ping().await?;
    println!("pong in {}ms", elapsed.as_millis());
    connection.disconnect();
    Ok(())
}

async fn join_session(
    cli: &Cli,
    credentials: Credentials,
    project_id: &str,
) -> Result<SessionStore, CliError> {
    let connection = Connection::new(ClientConfig::session(&cli.url));
    let store = SessionStore::new(connection, credentials);
    store.join_project(project_id).await?;
    Ok(store)
}

async fn run_join(cli: &Cli, credentials: Credentials, project_id: &str) -> Result<(), CliError> {
    let connection = Connection::new(ClientConfig::session(&cli.url));
    let store = SessionStore::new(connection, credentials);
    let mut events = store.subscribe();

    let project = store.join_project(project_id).await?;
    eprintln!(
        "joined {} (version {}, {} collaborators, {} comments)",
        project.name,
        project.version,
        project.collaborators.len(),
        project.comments.len(),
    );

    loop {
        match events.recv().await {
            Ok(SessionEvent::Applied(event)) => print_event(&event),
            Ok(SessionEvent::ConnectionLost { reason }) => eprintln!("connection lost: {reason}"),
            Ok(SessionEvent::Reconnected) => {
                eprintln!("reconnected; re-joining {project_id}");
                let project = store.join_project(project_id).await?;
                eprintln!("re-joined at version {}", project.version);
            }
            Ok(SessionEvent::Error { message }) => eprintln!("server error: {message}"),
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                eprintln!("lagged; skipped {skipped} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                return Err(CliError::StreamEnded);
            }
        }
    }
}

async fn run_status_push(
    cli: &Cli,
    credentials: Credentials,
    project_id: &str,
) -> Result<(), CliError> {
    let connection = Connection::new(ClientConfig::new(&cli.url));
    connection.connect(credentials).await?;

    let watcher = ProcessingWatcher::subscribe(connection.clone(), project_id).await?;
    let mut updates = watcher.updates();
    loop {
        if updates.changed().await.is_err() {
            return Err(CliError::StreamEnded);
        }
        let update = updates.borrow().clone();
        if let Some(update) = update {
            let terminal = update.status.is_terminal();
            print_status(&update);
            if terminal {
                break;
            }
        }
    }
    watcher.stop().await;
    connection.disconnect();
    Ok(())
}

async fn run_status_poll(
    cli: &Cli,
    project_id: &str,
    interval: Duration,
) -> Result<(), CliError> {
    let source = HttpStatusSource::new(&cli.api_url);
    let mut updates = poll_status(source, project_id, interval);
    while let Some(update) = updates.recv().await {
        let update = update?;
        print_status(&update);
    }
    Ok(())
}

fn print_event(event: &ServerEvent) {
    match event {
        ServerEvent::UserJoined(participant) => {
            println!("+ {} joined", participant.username);
        }
        ServerEvent::UserLeft { user_id } => println!("- {user_id} left"),
        ServerEvent::CursorMoved { user_id, x, y } => {
            println!("~ {user_id} cursor ({x:.0}, {y:.0})");
        }
        ServerEvent::CommentAdded(comment) => {
            println!("comment {} by {}: {}", comment.id, comment.username, comment.content);
        }
        ServerEvent::CommentUpdated(comment) => {
            let state = if comment.resolved { " (resolved)" } else { "" };
            println!("comment {} updated{state}: {}", comment.id, comment.content);
        }
        ServerEvent::CommentDeleted { comment_id } => println!("comment {comment_id} deleted"),
        ServerEvent::ProjectUpdated(update) => {
            println!("update {} ({:?}) by {}", update.id, update.kind, update.user_id);
        }
        ServerEvent::ProjectLocked { username, .. } => println!("locked by {username}"),
        ServerEvent::ProjectUnlocked => println!("unlocked"),
        ServerEvent::Processing(update) => print_status(update),
        ServerEvent::ViralScore { viral_score, .. } => println!("viral score: {viral_score}"),
        ServerEvent::Error { message } => eprintln!("server error: {message}"),
    }
}

fn print_status(update: &ProcessingUpdate) {
    let stage = update.stage.as_deref().unwrap_or("-");
    match update.status {
        JobStatus::Failed => {
            let error = update.error.as_deref().unwrap_or("unknown error");
            println!("failed at {stage}: {error}");
        }
        JobStatus::Completed => {
            let score = update
                .viral_score
                .map_or_else(|| "n/a".to_owned(), |score| format!("{score:.1}"));
            println!("completed (viral score {score})");
        }
        status => println!("{status:?} {}% ({stage})", update.progress),
    }
}
