#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use args::{Args, Command};
use clap::Parser;
use switchboard_config::Config;
use switchboard_keys::{KeyManager, RsaKeyManager};
use switchboard_llm::{ChatRequest, Dispatcher};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let _telemetry_guard = switchboard_telemetry::init(config.telemetry.as_ref(), &args.log)?;

    let keys = RsaKeyManager::open_or_create(&config.keys_dir)
        .with_context(|| format!("failed to open keys in {}", config.keys_dir.display()))?;

    match args.command {
        Command::Encrypt { plaintext } => encrypt(&keys, &plaintext),
        Command::Chat { request } => {
            let mut builder = Dispatcher::builder().config(&config).key_manager(Arc::new(keys));
            if let Some(environment) = args.environment.as_deref() {
                builder = builder.environment(environment);
            }

            chat(&builder.build()?, &request).await
        }
    }
}

fn encrypt(keys: &dyn KeyManager, plaintext: &[String]) -> anyhow::Result<()> {
    for secret in plaintext {
        println!("{}", keys.encrypt(secret)?);
    }

    Ok(())
}

async fn chat(dispatcher: &Dispatcher, path: &Path) -> anyhow::Result<()> {
    let raw = if path.as_os_str() == "-" {
        let mut raw = String::new();
        tokio::io::stdin().read_to_string(&mut raw).await?;
        raw
    } else {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    let request: ChatRequest = serde_json::from_str(&raw).context("malformed chat request")?;

    tracing::info!(
        provider = request.provider.as_deref().unwrap_or(dispatcher.default_provider()),
        model = %request.model,
        environment = %dispatcher.environment(),
        "dispatching chat request"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let mut stdout = tokio::io::stdout();
    if let Some(completion) = dispatcher
        .dispatch_with_cancel(&request, Some(&mut stdout), cancel)
        .await?
    {
        let mut body = serde_json::to_vec_pretty(&completion)?;
        body.push(b'\n');
        stdout.write_all(&body).await?;
    }
    stdout.flush().await?;

    Ok(())
}
