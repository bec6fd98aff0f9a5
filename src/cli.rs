use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "parley", version, about = "Tool-using chat agent with persistent threads")]
pub struct Cli {
    /// Settings file (defaults to `~/.parley/settings.json`).
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat on a thread. Reads lines from stdin unless a message is given.
    Chat(ChatArgs),
    /// List threads, most recent first.
    Threads,
    /// Print a thread's user and assistant turns.
    History { thread_id: String },
    /// Delete a thread's checkpoints and title.
    Delete { thread_id: String },
    /// Set a thread's display title.
    Rename { thread_id: String, title: String },
    /// Run the HTTP/SSE server.
    Serve(ServeArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Thread to continue. A new thread is started when omitted.
    #[arg(long, short)]
    pub thread: Option<String>,

    /// Send a single message and exit.
    pub message: Option<String>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub host: Option<String>,

    #[arg(long)]
    pub port: Option<u16>,
}
