use std::time::Duration;

pub const INFLUXDB_HOST: &str = "192.168.137.143";
pub const INFLUXDB_PORT: u16 = 8086;
pub const INFLUXDB_DB: &str = "environment";

pub const MEASUREMENT_NAME: &str = "environment";
pub const LOCATION_TAG_KEY: &str = "location";
pub const LOCATION: &str = "your_location";

pub const MEASUREMENT_INTERVAL: Duration = Duration::from_secs(1);

pub const SENSOR_I2C_ADDRESS: u8 = 0x76;
pub const SEA_LEVEL_PRESSURE_HPA: f32 = 1013.25;

pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

pub const READ_RETRIES: usize = 3;
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Builds with the `fail-fast` feature stop on the first failed tick.
pub const FAILURE_POLICY: FailurePolicy = if cfg!(feature = "fail-fast") {
    FailurePolicy::Abort
} else {
    FailurePolicy::Skip
};

/// What the loop does when a sensor read or a database write fails mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Propagate the error and stop the collector.
    Abort,
    /// Log the error, drop the tick and carry on with the next one.
    Skip,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub influxdb_host: String,
    pub influxdb_port: u16,
    pub influxdb_db: String,
    pub measurement_name: String,
    pub location: String,
    pub interval: Duration,
    pub sensor_address: u8,
    pub sea_level_pressure: f32,
    pub write_timeout: Duration,
    pub read_retries: usize,
    pub read_retry_delay: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            influxdb_host: INFLUXDB_HOST.to_string(),
            influxdb_port: INFLUXDB_PORT,
            influxdb_db: INFLUXDB_DB.to_string(),
            measurement_name: MEASUREMENT_NAME.to_string(),
            location: LOCATION.to_string(),
            interval: MEASUREMENT_INTERVAL,
            sensor_address: SENSOR_I2C_ADDRESS,
            sea_level_pressure: SEA_LEVEL_PRESSURE_HPA,
            write_timeout: WRITE_TIMEOUT,
            read_retries: READ_RETRIES,
            read_retry_delay: READ_RETRY_DELAY,
            failure_policy: FAILURE_POLICY,
        }
    }
}

impl Config {
    pub fn influxdb_url(&self) -> String {
        format!("http://{}:{}", self.influxdb_host, self.influxdb_port)
    }
}
