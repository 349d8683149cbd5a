//! Unigate CLI - Command line front end for the unified gateway.
//!
//! Every command loads a gateway configuration, performs one gateway call
//! and prints the JSON response envelope on stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use unigate_common::{EntityDescriptor, Response, SecretString};
use unigate_gateway::{BatchOperation, CallRequest, Gateway, GatewayConfig};
use unigate_storage::HttpMethod;

#[derive(Parser)]
#[command(name = "unigate")]
#[command(about = "Unigate - Unified access to document, tree, blob and RPC backends")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Gateway configuration file.
    #[arg(short, long, default_value = "unigate.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Document store operations.
    Doc {
        #[command(subcommand)]
        action: DocCommand,
    },

    /// Commit a JSON array of batch operations atomically.
    Batch {
        /// File holding the operations.
        file: PathBuf,
    },

    /// Tree store operations.
    Tree {
        #[command(subcommand)]
        action: TreeCommand,
    },

    /// Blob store operations.
    Blob {
        #[command(subcommand)]
        action: BlobCommand,
    },

    /// Remote calls.
    Rpc {
        #[command(subcommand)]
        action: RpcCommand,
    },

    /// Authentication.
    Auth {
        #[command(subcommand)]
        action: AuthCommand,
    },

    /// Validate the configuration and initialize every backend.
    CheckConfig,
}

#[derive(Subcommand)]
enum DocCommand {
    /// Fetch a document.
    Get {
        /// Target as `kind/id`.
        target: String,
    },

    /// Create or replace a document.
    Put {
        /// Target as `kind/id`, or `kind` to allocate a fresh id.
        target: String,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Merge top-level fields into an existing document.
    Patch {
        target: String,

        #[command(flatten)]
        payload: PayloadArgs,
    },

    /// Delete a document.
    Delete { target: String },

    /// Check whether a document exists.
    Exists { target: String },
}

#[derive(Subcommand)]
enum TreeCommand {
    /// List every child of a node.
    List { target: String },

    /// Fetch one child of a node.
    Get {
        target: String,
        /// Child identifier.
        id: String,
    },

    /// Replace a node.
    Set {
        target: String,

        #[command(flatten)]
        payload: PayloadArgs,
    },
}

#[derive(Subcommand)]
enum BlobCommand {
    /// Upload a local file.
    Upload {
        target: String,
        /// File to upload.
        file: PathBuf,
    },

    /// Download into the configured downloads directory.
    Download { target: String },

    /// Check whether a blob exists.
    Exists { target: String },

    /// Delete a blob.
    Delete { target: String },
}

#[derive(Subcommand)]
enum RpcCommand {
    /// Invoke a callable.
    Call {
        /// Callable as `kind` or `kind/id`.
        target: String,

        /// HTTP method.
        #[arg(short, long, default_value = "POST")]
        method: String,

        #[command(flatten)]
        payload: PayloadArgs,

        /// Sign in anonymously before calling.
        #[arg(long, conflicts_with = "email")]
        anonymous: bool,

        /// Sign in with this email before calling (password is prompted).
        #[arg(long)]
        email: Option<String>,
    },
}

#[derive(Subcommand)]
enum AuthCommand {
    /// Start an anonymous session.
    Anonymous,

    /// Sign in with email and password.
    SignIn {
        #[arg(short, long)]
        email: String,
    },

    /// Create an account.
    SignUp {
        #[arg(short, long)]
        email: String,

        /// Display name applied after creation.
        #[arg(short, long)]
        display_name: Option<String>,
    },
}

#[derive(clap::Args)]
struct PayloadArgs {
    /// Inline JSON payload.
    #[arg(short, long, conflicts_with = "file")]
    data: Option<String>,

    /// File holding the JSON payload.
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?
        }
        Err(_) => tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?,
    }

    let config = GatewayConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;
    let gateway = Gateway::from_config(&config).context("Failed to build gateway")?;
    gateway
        .initialize()
        .await
        .into_result()
        .context("Failed to initialize backends")?;

    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    match cli.command {
        Commands::Doc { action } => cmd_doc(&gateway, action).await,
        Commands::Batch { file } => cmd_batch(&gateway, &file).await,
        Commands::Tree { action } => cmd_tree(&gateway, action).await,
        Commands::Blob { action } => cmd_blob(&gateway, action, &cancellation).await,
        Commands::Rpc { action } => cmd_rpc(&gateway, action, &cancellation).await,
        Commands::Auth { action } => cmd_auth(&gateway, action).await,
        Commands::CheckConfig => cmd_check_config(&gateway, &config),
    }
}

/// Print the envelope and turn an error envelope into a failing exit.
fn finish<T: Serialize>(response: Response<T>) -> Result<()> {
    let json = serde_json::to_string_pretty(&response).context("Failed to encode response")?;
    println!("{}", json);

    if let Response::Error { kind, message } = response {
        anyhow::bail!("{}: {}", kind, message);
    }
    Ok(())
}

fn parse_target(target: &str) -> Result<EntityDescriptor> {
    EntityDescriptor::parse(target).with_context(|| format!("Invalid target '{}'", target))
}

fn read_payload(args: &PayloadArgs) -> Result<Value> {
    let text = match (&args.data, &args.file) {
        (Some(data), _) => data.clone(),
        (None, Some(file)) => std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read payload {}", file.display()))?,
        (None, None) => anyhow::bail!("A payload is required: pass --data or --file"),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

fn read_object(args: &PayloadArgs) -> Result<Map<String, Value>> {
    match read_payload(args)? {
        Value::Object(fields) => Ok(fields),
        _ => anyhow::bail!("Payload must be a JSON object"),
    }
}

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    Ok(SecretString::new(password))
}

async fn cmd_doc(gateway: &Gateway, action: DocCommand) -> Result<()> {
    let documents = gateway.documents();
    match action {
        DocCommand::Get { target } => {
            finish(documents.get::<Value>(&parse_target(&target)?).await)
        }
        DocCommand::Put { target, payload } => {
            let descriptor = parse_target(&target)?;
            let value = read_payload(&payload)?;
            let fixed = descriptor.id.is_some();
            finish(documents.create_at(&descriptor, &value, fixed).await)
        }
        DocCommand::Patch { target, payload } => {
            let fields = read_object(&payload)?;
            finish(documents.update_at(&parse_target(&target)?, fields).await)
        }
        DocCommand::Delete { target } => finish(documents.delete(&parse_target(&target)?).await),
        DocCommand::Exists { target } => finish(documents.exists(&parse_target(&target)?).await),
    }
}

async fn cmd_batch(gateway: &Gateway, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read batch {}", file.display()))?;
    let operations: Vec<BatchOperation> =
        serde_json::from_str(&text).context("Invalid batch file")?;

    info!("Committing {} operations", operations.len());
    finish(gateway.batches().commit(operations).await)
}

async fn cmd_tree(gateway: &Gateway, action: TreeCommand) -> Result<()> {
    let tree = gateway.tree();
    match action {
        TreeCommand::List { target } => finish(tree.get_all::<Value>(&parse_target(&target)?).await),
        TreeCommand::Get { target, id } => {
            finish(tree.get_by_id::<Value>(&parse_target(&target)?, id).await)
        }
        TreeCommand::Set { target, payload } => {
            let value = read_payload(&payload)?;
            finish(tree.set(&parse_target(&target)?, &value).await)
        }
    }
}

async fn cmd_blob(
    gateway: &Gateway,
    action: BlobCommand,
    cancellation: &CancellationToken,
) -> Result<()> {
    let blobs = gateway.blobs();
    match action {
        BlobCommand::Upload { target, file } => {
            info!("Uploading {} to {}", file.display(), target);
            finish(blobs.upload(&parse_target(&target)?, &file, cancellation).await)
        }
        BlobCommand::Download { target } => {
            finish(blobs.download(&parse_target(&target)?, cancellation).await)
        }
        BlobCommand::Exists { target } => finish(blobs.exists(&parse_target(&target)?).await),
        BlobCommand::Delete { target } => finish(blobs.delete(&parse_target(&target)?).await),
    }
}

async fn cmd_rpc(
    gateway: &Gateway,
    action: RpcCommand,
    cancellation: &CancellationToken,
) -> Result<()> {
    let RpcCommand::Call {
        target,
        method,
        payload,
        anonymous,
        email,
    } = action;

    if anonymous {
        gateway
            .auth()
            .sign_in_anonymously()
            .await
            .into_result()
            .context("Anonymous sign-in failed")?;
    } else if let Some(email) = email {
        let password = prompt_password("Password: ")?;
        gateway
            .auth()
            .sign_in_with_password(&email, &password)
            .await
            .into_result()
            .context("Sign-in failed")?;
    }

    let method: HttpMethod = method.parse().context("Invalid HTTP method")?;
    let descriptor = parse_target(&target)?;
    let value = if payload.data.is_some() || payload.file.is_some() {
        Some(read_payload(&payload)?)
    } else {
        None
    };

    let request = CallRequest {
        target: descriptor,
        method,
        payload: value,
    };
    finish(
        gateway
            .rpc()
            .invoke_with::<Value, Value>(&request, cancellation)
            .await,
    )
}

async fn cmd_auth(gateway: &Gateway, action: AuthCommand) -> Result<()> {
    let auth = gateway.auth();
    match action {
        AuthCommand::Anonymous => finish(auth.sign_in_anonymously().await),
        AuthCommand::SignIn { email } => {
            let password = prompt_password("Password: ")?;
            finish(auth.sign_in_with_password(&email, &password).await)
        }
        AuthCommand::SignUp {
            email,
            display_name,
        } => {
            let password = prompt_password("Choose a password: ")?;
            let confirm = prompt_password("Confirm password: ")?;
            if password != confirm {
                anyhow::bail!("Passwords do not match");
            }
            finish(
                auth.sign_up(&email, &password, display_name.as_deref())
                    .await,
            )
        }
    }
}

fn cmd_check_config(gateway: &Gateway, config: &GatewayConfig) -> Result<()> {
    info!("Backends: {}", gateway.context().describe());

    let summary = serde_json::json!({
        "backends": {
            "document": gateway.context().documents.name(),
            "tree": gateway.context().tree.name(),
            "blob": gateway.context().blobs.name(),
            "rpc": gateway.context().rpc.name(),
            "auth": gateway.context().auth.name(),
        },
        "entities": gateway.resolver().rules(),
        "downloads_dir": config.path_resolver().base(),
    });
    finish(Response::success(summary))
}
