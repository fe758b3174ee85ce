use anyhow::Context as _;
use bme280::i2c::BME280;
use rppal::{hal::Delay, i2c::I2c};

use crate::config::Config;

/// Anything that can report temperature, pressure and pressure-derived altitude.
pub trait EnvSensor {
    /// Temperature in °C.
    fn read_temperature(&mut self) -> Result<f32, anyhow::Error>;

    /// Air pressure in hPa.
    fn read_pressure(&mut self) -> Result<f32, anyhow::Error>;

    /// Altitude in meters, derived from the current pressure.
    fn read_altitude(&mut self) -> Result<f32, anyhow::Error>;
}

/// Altitude for a pressure reading under the standard atmosphere model.
pub fn altitude_from_pressure(pressure_hpa: f32, sea_level_hpa: f32) -> f32 {
    44330.0 * (1.0 - (pressure_hpa / sea_level_hpa).powf(0.1903))
}

/// BMP280 (or register-compatible BME280) on the Raspberry Pi's primary I2C bus.
#[derive(Debug)]
pub struct Bmp280 {
    delay: Delay,
    device: BME280<I2c>,
    sea_level_pressure: f32,
}

impl Bmp280 {
    pub fn new(config: &Config) -> Result<Bmp280, anyhow::Error> {
        let i2c = I2c::new().context("Failed to initialize I2C")?;
        let device = BME280::new(i2c, config.sensor_address);

        Ok(Bmp280 {
            delay: Delay,
            device,
            sea_level_pressure: config.sea_level_pressure,
        })
    }

    pub fn init(&mut self) -> Result<(), anyhow::Error> {
        self.device
            .init(&mut self.delay)
            .context("Failed to initialize BMP280")?;

        Ok(())
    }

    fn measure(&mut self) -> Result<(f32, f32), anyhow::Error> {
        let m = self
            .device
            .measure(&mut self.delay)
            .context("Failed to read BMP280 measurements")?;

        // The driver reports Pa.
        Ok((m.temperature, m.pressure / 100.0))
    }
}

impl EnvSensor for Bmp280 {
    fn read_temperature(&mut self) -> Result<f32, anyhow::Error> {
        let (temperature, _) = self.measure()?;
        Ok(temperature)
    }

    fn read_pressure(&mut self) -> Result<f32, anyhow::Error> {
        let (_, pressure) = self.measure()?;
        Ok(pressure)
    }

    fn read_altitude(&mut self) -> Result<f32, anyhow::Error> {
        let (_, pressure) = self.measure()?;
        Ok(altitude_from_pressure(pressure, self.sea_level_pressure))
    }
}
