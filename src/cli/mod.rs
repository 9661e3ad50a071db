//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "querymind",
    version,
    about = "Open-domain question answering over a fixed passage corpus",
    long_about = "QueryMind answers natural-language questions by retrieving the most similar passages \
                  from a prebuilt vector index and extracting an answer span from each with a reader model."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/querymind/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the corpus and models and serve questions on the local socket
    Serve,

    /// Ask a question
    Ask {
        /// Question to ask
        question: String,

        /// Number of passages to retrieve (defaults to retrieval.default_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Answer in this process instead of asking the running server
        #[arg(long)]
        local: bool,

        /// Show the answer in JSON format
        #[arg(long)]
        json: bool,

        /// Conversation to record the exchange in (requires --user)
        #[arg(long, requires = "user")]
        conversation: Option<String>,

        /// User owning the conversation
        #[arg(long, requires = "conversation")]
        user: Option<String>,
    },

    /// Check that the server is up and report corpus sizes
    Health,

    /// Manage conversations
    Conversations {
        #[command(subcommand)]
        action: ConversationAction,
    },

    /// Manage conversation messages
    Messages {
        #[command(subcommand)]
        action: MessageAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConversationAction {
    /// List a user's conversations, most recent first
    List {
        /// User ID
        user: String,
    },

    /// Start a new conversation
    Create {
        /// User ID
        user: String,

        /// Conversation title
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Rename a conversation
    Rename {
        /// Conversation ID
        id: String,

        /// New title
        title: String,
    },

    /// Delete a conversation and its messages
    Delete {
        /// Conversation ID
        id: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum MessageAction {
    /// Show a conversation's messages, oldest first
    List {
        /// Conversation ID
        conversation: String,
    },

    /// Store a question/answer exchange
    Save {
        /// Conversation ID
        #[arg(long)]
        conversation: String,

        /// User ID
        #[arg(long)]
        user: String,

        /// Question text
        #[arg(long)]
        question: String,

        /// Answer text
        #[arg(long)]
        answer: String,

        /// Answer confidence logit
        #[arg(long, allow_negative_numbers = true)]
        confidence: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
