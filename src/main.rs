#![forbid(unsafe_code)]

use std::sync::Arc;

use dotenvy::dotenv;
use fishcast::{
    analyzer::{Analyze, Disabled, SpotAnalyzer},
    routes::{routes, Services},
    CatchStore, Config, ForecastEngine,
};
use log::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), eyre::Error> {
    dotenv().ok();
    pretty_env_logger::init_timed();

    let config = Config::from_env()?;
    debug!("Using {:?}", config);

    info!("Opening catch log at {}", config.database_url);
    let catches = CatchStore::open(&config.database_url).await?;

    let analyzer: Arc<dyn Analyze> = match config.analyzer {
        Some(analyzer) => {
            info!("Analyzing spots with {}", analyzer.model);
            Arc::new(SpotAnalyzer::new(analyzer)?)
        }
        None => {
            warn!("OPENROUTER_API_KEY is not set, spot analysis is disabled");
            Arc::new(Disabled)
        }
    };

    let api = routes(Services {
        catches: Arc::new(catches),
        forecasts: ForecastEngine::new(),
        analyzer,
        max_upload_bytes: config.max_upload_bytes,
    });

    let (address, server) =
        warp::serve(api).try_bind_with_graceful_shutdown(config.bind_address, async {
            tokio::signal::ctrl_c().await.ok();
        })?;

    info!("Listening on http://{address}");
    server.await;
    info!("Shut down");

    Ok(())
}
