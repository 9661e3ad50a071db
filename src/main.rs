use querymind::cli::{Cli, Commands, ConfigAction, ConversationAction, MessageAction};
use querymind::config::Config;
use querymind::error::{QueryMindError, Result};
use querymind::retrieval::RetrievalReadingPipeline;
use querymind::server::{
    AskRequest, AskResponse, HealthReport, IpcClient, IpcRequest, QaService, Server,
};
use querymind::storage::{open_store, Conversation, Message, NewMessage};
use std::path::PathBuf;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Serve => {
            cmd_serve(cli.config)?;
        }
        Commands::Ask {
            question,
            k,
            local,
            json,
            conversation,
            user,
        } => {
            let request = AskRequest {
                question,
                k,
                conversation_id: conversation,
                user_id: user,
            };
            cmd_ask(cli.config, request, local, json)?;
        }
        Commands::Health => {
            cmd_health(cli.config)?;
        }
        Commands::Conversations { action } => {
            cmd_conversations(cli.config, action)?;
        }
        Commands::Messages { action } => {
            cmd_messages(cli.config, action)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = if verbose {
        "querymind=debug"
    } else {
        "querymind=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| QueryMindError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?;

    tracing::info!("Loading corpus and models...");
    let server = Server::from_config(&config)?;

    runtime()?.block_on(server.run())
}

fn cmd_ask(
    config_path: Option<PathBuf>,
    request: AskRequest,
    local: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path)?.with_expanded_paths();

    let answer: AskResponse = if local {
        let pipeline = RetrievalReadingPipeline::load(&config)?;
        let store = open_store(&config.storage)?;
        let service = QaService::new(
            pipeline,
            store.clone(),
            config.retrieval.clone(),
            config.server.max_concurrent_inferences,
        );
        let answer = runtime()?.block_on(service.ask(request));
        store.shutdown()?;
        answer?
    } else {
        send(&config, IpcRequest::Ask(request))?
    };

    if json {
        println!("{}", to_json(&answer)?);
    } else {
        println!("Question: {}", answer.question);
        println!("Answer:   {}", answer.answer);
        println!("Confidence logit: {:.2}", answer.confidence_logit);
    }

    Ok(())
}

fn cmd_health(config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config(config_path)?.with_expanded_paths();
    let health: HealthReport = send(&config, IpcRequest::Health)?;

    println!("QueryMind Status");
    println!("================");
    println!("Server:   {}", health.status);
    println!("Passages: {}", health.stats.passages_count);
    println!(
        "Index:    {} vectors ({})",
        health.stats.index_size, health.stats.index_kind
    );

    Ok(())
}

fn cmd_conversations(config_path: Option<PathBuf>, action: ConversationAction) -> Result<()> {
    let config = load_config(config_path)?.with_expanded_paths();

    match action {
        ConversationAction::List { user } => {
            let conversations: Vec<Conversation> =
                send(&config, IpcRequest::ListConversations { user_id: user })?;

            if conversations.is_empty() {
                println!("No conversations");
            }
            for conversation in conversations {
                println!(
                    "{}  {}  (updated {})",
                    conversation.id,
                    conversation.title,
                    conversation.updated_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        ConversationAction::Create { user, title } => {
            let conversation: Conversation = send(
                &config,
                IpcRequest::CreateConversation {
                    user_id: user,
                    title,
                },
            )?;
            println!("✓ Created conversation {} ({})", conversation.id, conversation.title);
        }
        ConversationAction::Rename { id, title } => {
            let conversation: Conversation = send(
                &config,
                IpcRequest::RenameConversation {
                    conversation_id: id,
                    title,
                },
            )?;
            println!("✓ Renamed conversation {} to {}", conversation.id, conversation.title);
        }
        ConversationAction::Delete { id } => {
            let response = IpcClient::new(config.server.socket_path.clone()).send_blocking(
                &IpcRequest::DeleteConversation {
                    conversation_id: id.clone(),
                },
            )?;
            if !response.success {
                return Err(QueryMindError::Server(
                    response.message.unwrap_or_else(|| "delete failed".to_string()),
                ));
            }
            println!("✓ Deleted conversation {}", id);
        }
    }

    Ok(())
}

fn cmd_messages(config_path: Option<PathBuf>, action: MessageAction) -> Result<()> {
    let config = load_config(config_path)?.with_expanded_paths();

    match action {
        MessageAction::List { conversation } => {
            let messages: Vec<Message> = send(
                &config,
                IpcRequest::ListMessages {
                    conversation_id: conversation,
                },
            )?;

            if messages.is_empty() {
                println!("No messages");
            }
            for message in messages {
                println!("[{}]", message.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!("  Q: {}", message.question);
                match message.confidence {
                    Some(confidence) => println!("  A: {} ({:.2})", message.answer, confidence),
                    None => println!("  A: {}", message.answer),
                }
            }
        }
        MessageAction::Save {
            conversation,
            user,
            question,
            answer,
            confidence,
        } => {
            let message: Message = send(
                &config,
                IpcRequest::SaveMessage(NewMessage {
                    conversation_id: conversation,
                    user_id: user,
                    question,
                    answer,
                    confidence,
                }),
            )?;
            println!("✓ Saved message {}", message.id);
        }
    }

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path)?;
            let content = toml::to_string_pretty(&config)?;
            println!("{}", content);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            // Create parent directory
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| QueryMindError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            Config::default().save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Point corpus.passages_path and corpus.index_path at your corpus,");
            println!("  and encoder/reader paths at the exported ONNX models.");
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'querymind config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

/// Send one request to the running server and decode its payload
fn send<T: serde::de::DeserializeOwned>(config: &Config, request: IpcRequest) -> Result<T> {
    IpcClient::new(config.server.socket_path.clone())
        .send_blocking(&request)?
        .into_data()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| QueryMindError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

// Extension trait for calling the async client from synchronous commands
trait BlockingSend {
    fn send_blocking(&self, request: &IpcRequest) -> Result<querymind::server::IpcResponse>;
}

impl BlockingSend for IpcClient {
    fn send_blocking(&self, request: &IpcRequest) -> Result<querymind::server::IpcResponse> {
        runtime()?.block_on(self.send(request))
    }
}
