use anyhow::{bail, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anipipe::config::AppConfig;
use anipipe::models::ContentIdentifier;
use anipipe::pipeline::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "anipipe=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let mut args = std::env::args().skip(1);
    let Some(raw_id) = args.next() else {
        bail!("usage: anipipe <id> [movie|series]\n  e.g. anipipe tmdb:555:3:5, anipipe kitsu:1376:4, anipipe tt0877057:1:1");
    };
    let forced_movie = matches!(args.next().as_deref(), Some("movie"));

    let Some(mut ident) = ContentIdentifier::parse(&raw_id) else {
        bail!("unrecognized identifier: {}", raw_id);
    };
    if forced_movie {
        ident.episode = None;
    }

    let config = AppConfig::load();
    config.log_config();

    let pipeline = Pipeline::new(&config);
    let candidates = pipeline.run(&ident).await?;

    tracing::info!("{} candidate(s)", candidates.len());
    println!("{}", serde_json::to_string_pretty(&candidates)?);

    Ok(())
}
