//! crm-data - one-shot queries against the CRM data service
//!
//! Runs a single read operation and prints the result as JSON:
//! `crm-data count orders '{"where":{"status":{"in":["open","late"]}}}'`

mod cli;

use std::sync::Arc;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crm_data::DataError;
use crm_data::config::Config;
use crm_data::orm::{AggregateArgs, CountArgs, Engine, FindFirstArgs, FindManyArgs, FindUniqueArgs};
use crm_data::services::PostgrestClient;

use crate::cli::{CliOptions, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let options = CliOptions::from_args()?;
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let mut client = PostgrestClient::from_config(&config);
    if let Some(schema) = options.schema_override.clone() {
        client = client.with_schema(schema);
    }
    let engine = Engine::new(Arc::new(client));

    tracing::info!(
        command = ?options.command,
        table = %options.table,
        "Running query"
    );

    let output = run(&engine, &options).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run(engine: &Engine, options: &CliOptions) -> anyhow::Result<JsonValue> {
    let table = options.table.as_str();
    let output = match options.command {
        Command::Find => {
            let args: FindManyArgs = descriptor(options)?;
            serde_json::to_value(engine.find_many(table, args).await?)?
        }
        Command::First => {
            let args: FindFirstArgs = descriptor(options)?;
            serde_json::to_value(engine.find_first(table, args).await?)?
        }
        Command::Unique => {
            let args: FindUniqueArgs = descriptor(options)?;
            serde_json::to_value(engine.find_unique(table, args).await?)?
        }
        Command::Count => {
            let args: CountArgs = descriptor(options)?;
            JsonValue::from(engine.count(table, args).await?)
        }
        Command::Aggregate => {
            let args: AggregateArgs = descriptor(options)?;
            serde_json::to_value(engine.aggregate(table, args).await?)?
        }
    };
    Ok(output)
}

fn descriptor<T: DeserializeOwned>(options: &CliOptions) -> anyhow::Result<T> {
    let parsed = serde_json::from_str(&options.descriptor)
        .map_err(|err| DataError::invalid_query(options.table.clone(), err.to_string()))
        .context("Invalid query descriptor")?;
    Ok(parsed)
}
