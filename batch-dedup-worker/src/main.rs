use anyhow::{Context, Error};
use batch_dedup_worker::{config::Config, pipeline::Pipeline, source::csv_file::csv_batches};
use envconfig::Envconfig;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
pub async fn main() -> Result<(), Error> {
    // A missing .env file is fine, the environment may already be set
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            return Err(e).context("failed to load .env file");
        }
    }

    setup_tracing();
    info!("Starting up...");

    let config = Config::init_from_env().context("invalid configuration")?;
    let pipeline_config = config
        .pipeline_config()
        .context("invalid pipeline configuration")?;
    let sink_config = config.sink_config();

    if config.prepare_stores {
        sink_config
            .prepare()
            .await
            .context("failed to prepare destination stores")?;
    }

    let source = csv_batches(&config.input_path, pipeline_config.batch_size)
        .with_context(|| format!("failed to open input {}", config.input_path))?;

    let pipeline = Pipeline::new(pipeline_config);
    match pipeline.run(source, sink_config.construct()).await {
        Ok(summary) => {
            info!(
                claimed_ids = summary.claimed_ids,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Run complete"
            );
            println!(
                "Done! Good rows: {}, Bad rows: {}",
                summary.totals.accepted, summary.totals.rejected
            );
            Ok(())
        }
        Err(failure) => {
            error!("Pipeline failed: {}", failure.error);
            println!(
                "Failed! Good rows: {}, Bad rows: {} (from {} completed batches)",
                failure.partial.accepted, failure.partial.rejected, failure.partial.batches
            );
            Err(failure.into())
        }
    }
}
