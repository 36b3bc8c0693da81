use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ots_store::config::{self, StoreConfig};
use ots_store::record::sanitize_view_count;
use ots_store::{CallContext, SecretRecord};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    // Ctrl-C aborts whatever remote call is in flight.
    let cancel = CancellationToken::new();
    let ctx = match args.timeout {
        Some(secs) => CallContext::with_timeout(Duration::from_secs(secs)),
        None => cfg.call_context(),
    }
    .with_cancellation(cancel.clone());
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = run(args.command, &cfg, &ctx).await;
    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "ots-store"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    // stdout carries command output; logs go to stderr.
    let json_logs = std::env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let (json_layer, text_layer) = if json_logs {
        (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ots_store=info".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .init();
    Ok(())
}

async fn run(command: cli::Commands, cfg: &StoreConfig, ctx: &CallContext) -> anyhow::Result<()> {
    let store = ots_store::connect(cfg)?;

    match command {
        cli::Commands::Check => {
            print_json(&json!({
                "backend": store.backend_name(),
                "ttl_days": cfg.ttl_days,
                "call_timeout_secs": cfg.call_timeout.map(|t| t.as_secs()),
            }))
        }
        cli::Commands::Get { secret_id } => {
            let record = store.get_secret(ctx, &secret_id).await?;
            print_json(&json!({
                "secret_id": record.secret_id,
                "view_count": record.view_count,
                "is_file": record.is_file,
                "data_bytes": record.data.len(),
                "nonce_bytes": record.nonce.len(),
                "salt_bytes": record.salt.len(),
                "header_bytes": record.header.len(),
                "ttl": record.ttl,
                "expires_at": record.expires_at().map(|t| t.to_rfc3339()),
            }))
        }
        cli::Commands::SetViews { secret_id, count } => {
            let view_count = sanitize_view_count(&count);
            store
                .update_secret(ctx, &SecretRecord::view_count_update(secret_id.as_str(), view_count))
                .await?;
            tracing::info!(secret_id = %secret_id, view_count, "view count set");
            print_json(&json!({ "secret_id": secret_id, "view_count": view_count }))
        }
        cli::Commands::Consume { secret_id } => {
            let remaining = store.consume_view(ctx, &secret_id).await?;
            if remaining == 0 {
                store.delete_secret(ctx, &secret_id).await?;
                tracing::info!(secret_id = %secret_id, "last view consumed, secret deleted");
            }
            print_json(&json!({ "secret_id": secret_id, "remaining": remaining }))
        }
        cli::Commands::Delete { secret_id } => {
            store.delete_secret(ctx, &secret_id).await?;
            print_json(&json!({ "secret_id": secret_id, "deleted": true }))
        }
    }
}

fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
