use std::collections::BTreeMap;

use backon::{ConstantBuilder, Retryable};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::watch;

use crate::{
    config::{Config, FailurePolicy, LOCATION_TAG_KEY},
    db::PointWriter,
    measurement::{Measurement, Reading},
    sensor::EnvSensor,
};

/// Owns the sensor and the database handle for the lifetime of the process.
#[derive(Debug)]
pub struct Collector<S, W> {
    sensor: S,
    writer: W,
    config: Config,
    tags: BTreeMap<String, String>,
    last_timestamp: Option<DateTime<Utc>>,
}

impl<S: EnvSensor, W: PointWriter> Collector<S, W> {
    pub fn new(sensor: S, writer: W, config: Config) -> Self {
        let tags = BTreeMap::from([(LOCATION_TAG_KEY.to_string(), config.location.clone())]);

        Self {
            sensor,
            writer,
            config,
            tags,
            last_timestamp: None,
        }
    }

    /// Acquires the sensor, then the database. Either failure aborts startup, and the
    /// database is never contacted when the sensor is missing.
    pub async fn start(
        acquire_sensor: impl FnOnce() -> Result<S, anyhow::Error>,
        connect_db: impl AsyncFnOnce() -> Result<W, anyhow::Error>,
        config: Config,
    ) -> Result<Self, anyhow::Error> {
        let sensor = acquire_sensor()?;
        let writer = connect_db().await?;

        Ok(Self::new(sensor, writer, config))
    }

    /// Polls, writes and sleeps until `shutdown` flips to `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        while !*shutdown.borrow() {
            if let Err(e) = self.tick().await {
                match self.config.failure_policy {
                    FailurePolicy::Abort => return Err(e),
                    FailurePolicy::Skip => log::error!("{e:#}"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("Collector stopped");
        Ok(())
    }

    /// One read, log, build and write cycle.
    pub async fn tick(&mut self) -> Result<Measurement, anyhow::Error> {
        let reading = self.read().await?;
        log::info!("{reading}");

        let timestamp = self.next_timestamp(Utc::now());
        let data = Measurement::new(
            &self.config.measurement_name,
            self.tags.clone(),
            timestamp,
            reading,
        )?;

        self.writer
            .write_point(&data)
            .await
            .map_err(|e| e.context("Failed to write measurement"))?;

        Ok(data)
    }

    async fn read(&mut self) -> Result<Reading, anyhow::Error> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.config.read_retry_delay)
            .with_max_times(self.config.read_retries);

        let sensor = &mut self.sensor;
        let reading = (|| std::future::ready(read_once(&mut *sensor)))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .notify(|e, dur| {
                log::error!("{e:#}");
                log::info!("Retrying in {:?}", dur);
            })
            .await?;

        Ok(reading)
    }

    /// Clock readings that do not move forward are bumped past the previous record.
    fn next_timestamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timestamp = match self.last_timestamp {
            Some(last) if now <= last => last + TimeDelta::nanoseconds(1),
            _ => now,
        };
        self.last_timestamp = Some(timestamp);
        timestamp
    }
}

fn read_once<S: EnvSensor>(sensor: &mut S) -> Result<Reading, anyhow::Error> {
    Ok(Reading {
        temperature: sensor.read_temperature()?,
        pressure: sensor.read_pressure()?,
        altitude: sensor.read_altitude()?,
    })
}
