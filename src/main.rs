//! mongobucket
//!
//! Streams every collection of a MongoDB database into an S3-compatible
//! bucket as a series of bounded segments.
//!
//! # Usage
//!
//! ```bash
//! # Report the export size
//! mongobucket parse ./config/db_property.json
//!
//! # Upload a sample object
//! mongobucket test ./config/storj_config.json
//!
//! # Export and upload, then print a read-only access key
//! mongobucket store ./config/db_property.json ./config/storj_config.json restrict
//! ```

use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use mongobucket::cli::CliInterface;
use mongobucket::error::Result;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse command-line arguments and load settings
/// 2. Initialize logging
/// 3. Install the Ctrl-C handler
/// 4. Run the selected command
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;

    initialize_logging(&cli);

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    cli.run(cancel).await
}

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins when set; otherwise the level comes from settings and
/// the `debug`/`--trace` switches.
fn initialize_logging(cli: &CliInterface) {
    let level = cli.settings().logging.level.to_tracing_level();
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.settings().logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
