use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use concierge::{init_tracing, AppConfig, AssistantContext, AssistantServer, Catalog, Message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file; CONCIERGE_* environment variables override it
    #[arg(short, long, default_value = "concierge.toml")]
    config: PathBuf,

    /// Assistant to talk to in the terminal
    #[arg(short, long, default_value = "travel_master")]
    assistant: String,

    /// Serve every assistant over HTTP instead of starting a chat
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::from_env_or_file(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        AppConfig::from_env().context("loading config from environment")?
    };
    init_tracing(&config.logging.level, config.logging.json);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("server.host and server.port must form a socket address")?;
    let context = AssistantContext::from_config(config).context("building assistants")?;
    let catalog = Catalog::build(&context)?;

    if cli.serve {
        AssistantServer::new(catalog).serve(addr).await?;
        return Ok(());
    }

    let agent = catalog
        .get(&cli.assistant)
        .with_context(|| format!("unknown assistant; choose one of {}", catalog.names().join(", ")))?;
    chat(&agent).await
}

async fn chat(agent: &concierge::Agent) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut conversation: Vec<Message> = Vec::new();

    stdout
        .write_all(format!("Talking to {} - type \"exit\" to end the session\n", agent.name()).as_bytes())
        .await?;
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.eq_ignore_ascii_case("exit") {
            break;
        }

        conversation.push(Message::user(line));
        match agent.invoke(conversation.clone()).await {
            Ok(outcome) => {
                let reply = outcome.final_text().unwrap_or_default();
                conversation = outcome.messages;
                stdout.write_all(format!("{reply}\n\n").as_bytes()).await?;
            }
            Err(err) => {
                conversation.pop();
                tracing::error!(error = %err, "assistant failed");
                stdout.write_all(format!("error: {err}\n\n").as_bytes()).await?;
            }
        }
    }
    Ok(())
}
