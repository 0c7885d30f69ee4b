//! Async API
//!
//! This module mirrors the blocking driver for hosts using the
//! [`embedded-hal-async`](https://crates.io/crates/embedded-hal-async)
//! traits. Semantics are identical to the blocking API.

use crate::{
    convert_raw, measurement_time_ms, sensitivity_bytes, start_command, Config, Error, WorkMode,
    POWER_ON_CMD, SENSITIVITY_DEFAULT, SENSITIVITY_MAX, SENSITIVITY_MIN,
};

/// Represents an I2C-connected BH1750 sensor.
#[derive(Copy, Clone, Debug)]
pub struct Bh1750<I2C> {
    /// Marker to satisfy the compiler.
    _i2c: core::marker::PhantomData<I2C>,

    config: Config,
    command: u8,
    measurement_time_ms: u8,
    sensitivity: u8,
    first_read_done: bool,
}

impl<I2C> Bh1750<I2C> {
    /// Current value of the sensor's measurement time register.
    pub fn sensitivity(&self) -> u8 {
        self.sensitivity
    }

    /// Wait applied between starting a measurement and fetching the result.
    pub fn measurement_time_ms(&self) -> u8 {
        self.measurement_time_ms
    }

    fn address(&self) -> u8 {
        self.config.address as u8
    }
}

impl<I2C> Bh1750<I2C>
where
    I2C: embedded_hal_async::i2c::I2c<embedded_hal_async::i2c::SevenBitAddress>,
{
    /// Creates a connection with a BH1750 sensor via I2C.
    ///
    /// Derives the start command and measurement time from the
    /// configuration and probes the sensor with a power-on command. If the
    /// probe is not acknowledged no driver is returned.
    pub async fn new(config: Config, i2c: &mut I2C) -> Result<Self, Error<I2C::Error>> {
        let sensor = Self {
            _i2c: core::marker::PhantomData,
            command: start_command(config.resolution, config.work_mode),
            measurement_time_ms: measurement_time_ms(config.resolution),
            sensitivity: SENSITIVITY_DEFAULT,
            first_read_done: false,
            config,
        };

        i2c.write(sensor.address(), &[POWER_ON_CMD])
            .await
            .map_err(|_| Error::NotDetected)?;
        log::debug!("BH1750 answered at 0x{:02x}", sensor.address());

        Ok(sensor)
    }

    /// Measure the ambient light intensity in lux.
    ///
    /// See the blocking [`Bh1750::read_lux`](crate::Bh1750::read_lux); the
    /// only difference is that the measurement wait yields to the executor
    /// instead of blocking the thread.
    pub async fn read_lux(
        &mut self,
        delay: &mut impl embedded_hal_async::delay::DelayNs,
        i2c: &mut I2C,
    ) -> Result<f32, Error<I2C::Error>> {
        // One budget step per retune keeps the loop finite even if the
        // sensor keeps flapping between saturated and zero readings.
        let mut retunes_left = SENSITIVITY_MAX - SENSITIVITY_MIN;
        loop {
            let raw = self.measure_raw(delay, i2c).await?;
            if self.config.auto_adjust && retunes_left > 0 {
                let retuned = match raw {
                    u16::MAX if self.sensitivity > SENSITIVITY_MIN => {
                        self.write_sensitivity(self.sensitivity - 1, i2c).await?;
                        true
                    }
                    0 if self.sensitivity < SENSITIVITY_MAX => {
                        self.write_sensitivity(self.sensitivity + 1, i2c).await?;
                        true
                    }
                    _ => false,
                };
                if retuned {
                    retunes_left -= 1;
                    continue;
                }
            }
            return Ok(convert_raw(raw, self.sensitivity, self.config.resolution));
        }
    }

    /// Write a new sensitivity value to the sensor's measurement time
    /// register.
    ///
    /// `value` must lie within 31..=254. Not available while
    /// [`Config::auto_adjust`] owns the register.
    pub async fn adjust_sensitivity(
        &mut self,
        value: u8,
        i2c: &mut I2C,
    ) -> Result<(), Error<I2C::Error>> {
        if !(SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&value) {
            return Err(Error::SensitivityOutOfRange);
        }
        if self.config.auto_adjust {
            return Err(Error::AutoAdjustEnabled);
        }
        self.write_sensitivity(value, i2c).await
    }

    async fn measure_raw(
        &mut self,
        delay: &mut impl embedded_hal_async::delay::DelayNs,
        i2c: &mut I2C,
    ) -> Result<u16, Error<I2C::Error>> {
        let start_pending =
            !(self.config.work_mode == WorkMode::Continuous && self.first_read_done);
        if start_pending {
            i2c.write(self.address(), &[self.command]).await?;
            self.first_read_done = true;
            delay.delay_ms(self.measurement_time_ms as u32).await;
        }

        let mut data = [0u8; 2];
        i2c.read(self.address(), &mut data).await?;
        let raw = u16::from_be_bytes(data);
        log::debug!("raw measurement: 0x{:04x}", raw);

        Ok(raw)
    }

    async fn write_sensitivity(
        &mut self,
        value: u8,
        i2c: &mut I2C,
    ) -> Result<(), Error<I2C::Error>> {
        let [high, low] = sensitivity_bytes(value);
        i2c.write(self.address(), &[high]).await?;
        i2c.write(self.address(), &[low]).await?;

        // Committed only once the sensor holds both register halves.
        self.sensitivity = value;
        log::debug!("sensitivity set to {}", value);

        // A continuous measurement in flight still uses the old
        // sensitivity; the next read has to start over.
        if self.config.work_mode == WorkMode::Continuous {
            self.first_read_done = false;
        }
        Ok(())
    }
}

// async mocking of I2C currently not supported by embedded-hal-mock,
// so the behavior is covered by the blocking test suite
