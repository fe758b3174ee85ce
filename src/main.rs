use anyhow::Context;
use collector::Collector;
use config::Config;
use db::InfluxDb;
use log::LevelFilter;
use sensor::Bmp280;
use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};
use tokio::{
    signal::unix::{SignalKind, signal},
    sync::watch,
};

mod collector;
mod config;
mod db;
mod measurement;
mod sensor;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    TermLogger::init(
        LevelFilter::Info,
        ConfigBuilder::new()
            .set_time_format_rfc3339()
            .set_time_offset_to_local()
            .map_err(|_| anyhow::anyhow!("Failed to set time offset to local"))?
            .build(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;

    if let Err(e) = run().await {
        log::error!("{e:#}");
        std::process::exit(1);
    }

    Ok(())
}

pub async fn run() -> Result<(), anyhow::Error> {
    let config = Config::default();

    let mut collector = Collector::start(
        || {
            let mut bmp280 = Bmp280::new(&config).context("Failed to initialize BMP280")?;
            bmp280.init()?;
            log::info!("BMP280 ready at I2C address {:#04x}", config.sensor_address);
            Ok(bmp280)
        },
        async || {
            let db = InfluxDb::connect(&config)
                .await
                .context("Failed to initialize database")?;
            log::info!(
                "Writing to InfluxDB database {} at {}",
                config.influxdb_db,
                config.influxdb_url()
            );
            Ok(db)
        },
        config.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match wait_for_shutdown().await {
            Ok(()) => {
                log::info!("Shutting down");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                // Keep the sender alive so the collector is not stopped by a missing handler.
                log::error!("{e:#}");
                std::future::pending::<()>().await;
            }
        }
    });

    collector.run(shutdown_rx).await
}

async fn wait_for_shutdown() -> Result<(), anyhow::Error> {
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("Failed to wait for Ctrl+C signal")?,
        _ = terminate.recv() => {}
    }

    Ok(())
}
