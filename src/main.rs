use clap::Parser;
use colored::*;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use demoforge::cli::Args;
use demoforge::config::{FileConfig, Settings};
use demoforge::knowledge::KnowledgeClient;
use demoforge::orchestrator::{run_generation, GenerationRequest, StreamEvent};
use demoforge::providers::{ModelClient, ProviderHandle};
use demoforge::store::MessageStore;
use demoforge::web::{self, ServerState};
use demoforge::Result;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("demoforge=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::resolve(&args, file);

    let store = MessageStore::open(&settings.db)?;
    let client = ProviderHandle::Http(ModelClient::new(settings.provider)?);
    let knowledge = KnowledgeClient::new(settings.knowledge_url.clone());

    if args.web {
        let state = Arc::new(ServerState {
            store,
            client,
            knowledge,
            model: settings.model.clone(),
            chat_only: settings.chat_only,
        });
        web::serve(settings.port, state).await?;
        return Ok(());
    }

    let Some(prompt) = args.prompt else {
        eprintln!("{}", "Provide a prompt, or pass --web for the browser UI.".red());
        std::process::exit(2);
    };

    run_terminal(prompt, &store, &knowledge, &client, &settings).await
}

/// One-shot terminal mode: stream the reply to stdout, then report where the
/// generated demo landed.
async fn run_terminal(
    prompt: String,
    store: &MessageStore,
    knowledge: &KnowledgeClient,
    client: &ProviderHandle,
    settings: &Settings,
) -> Result<()> {
    eprintln!("{}", format!("  model: {}", settings.model).bright_blue());
    eprintln!();

    let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
    let printer = tokio::spawn(async move {
        let mut artifact: Option<String> = None;
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Delta { text } => {
                    print!("{}", text);
                    let _ = io::stdout().flush();
                }
                StreamEvent::Artifact { message_id, .. } => {
                    artifact = Some(message_id);
                }
                StreamEvent::Warning { message } => {
                    eprintln!("\n{}", format!("  warning: {}", message).yellow());
                }
                StreamEvent::Error { message } => {
                    eprintln!("\n{}", format!("  error: {}", message).red());
                }
                StreamEvent::Meta { .. } => {}
            }
        }
        artifact
    });

    let request = GenerationRequest {
        prompt,
        conversation_id: None,
        pending_message_id: None,
        model: Some(settings.model.clone()),
        chat_only: settings.chat_only,
    };
    let outcome = run_generation(request, store, knowledge, client, &settings.model, &tx).await;
    drop(tx);

    let artifact = printer.await.ok().flatten();
    println!();

    match outcome {
        Ok(result) => {
            if result.html_found {
                if let Some(message_id) = artifact {
                    eprintln!(
                        "{}",
                        format!(
                            "  demo saved; view it with: demoforge --web  (message {})",
                            message_id
                        )
                        .bright_green()
                    );
                }
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}
