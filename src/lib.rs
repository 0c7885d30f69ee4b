//! This crate provides a platform agnostic no_std driver for the BH1750 ambient light sensor.
//! The driver is compatible with the [`embedded-hal`](https://crates.io/crates/embedded-hal) traits.
//!
//! The datasheet of the sensor can be found [here](https://fscdn.rohm.com/en/products/databook/datasheet/ic/sensor/light/bh1750fvi-e.pdf).
//!
//! ## Supported features
//! * One-shot and continuous measurement mode
//! * All three resolution modes (4 lx, 1 lx and 0.5 lx per count)
//! * Both bus addresses (ADDR pin low/high)
//! * Manual sensitivity adjustment via the measurement time register
//! * Optional automatic sensitivity tuning on saturated or zero readings
//! * Converting the raw register value into the ambient light intensity in lux
//!
//! ## Unsupported features
//! * Interrupt or DMA driven transfers
//! * Sharing one driver instance between execution contexts (wrap it in a
//!   mutex on multi-threaded hosts)
//!
//! ## Usage
//!
//! ### Creating a driver instance
//!
//! Construction probes the sensor with a power-on command, so it needs the
//! bus and fails with [`Error::NotDetected`] if nothing acknowledges:
//!
//! ```no_run
//! use bh1750::{Bh1750, Config};
//! use embedded_hal_mock::i2c::Mock as I2cMock;
//!
//! let mut i2c = I2cMock::new(&[]);
//! let mut sensor = Bh1750::new(Config::default(), &mut i2c).unwrap();
//! ```
//!
//! ### Reading the ambient light intensity
//!
//! ```no_run
//! use bh1750::{Address, Bh1750, Config, Resolution, WorkMode};
//! use embedded_hal_mock::delay::MockNoop;
//! use embedded_hal_mock::i2c::Mock as I2cMock;
//!
//! let mut i2c = I2cMock::new(&[]);
//! let mut delay = MockNoop::new();
//!
//! let config = Config {
//!     address: Address::Low,
//!     resolution: Resolution::High,
//!     work_mode: WorkMode::Continuous,
//!     auto_adjust: false,
//! };
//! let mut sensor = Bh1750::new(config, &mut i2c).unwrap();
//!
//! // The first read starts the measurement and blocks for the measurement
//! // time; in continuous mode later reads only fetch the latest value.
//! let lux = sensor.read_lux(&mut delay, &mut i2c).unwrap();
//! ```
//!
//! On a Linux host the mocks are replaced by `linux_embedded_hal::I2cdev`
//! and `linux_embedded_hal::Delay`.

#![cfg_attr(not(test), no_std)]

#[cfg(feature = "async")]
pub mod asynch;

/// Default value of the measurement time register.
pub const SENSITIVITY_DEFAULT: u8 = 69;

/// Smallest value the measurement time register accepts.
pub const SENSITIVITY_MIN: u8 = 31;

/// Largest value the measurement time register accepts.
pub const SENSITIVITY_MAX: u8 = 254;

const POWER_ON_CMD: u8 = 0x01;

const CONTINUOUS_LOW_RES_CMD: u8 = 0x13; // Start measurement at 4 lx resolution.
const CONTINUOUS_HIGH_RES_CMD: u8 = 0x10; // Start measurement at 1 lx resolution.
const CONTINUOUS_HIGH_RES_2_CMD: u8 = 0x11; // Start measurement at 0.5 lx resolution.
const ONE_TIME_LOW_RES_CMD: u8 = 0x23; // As above, but the sensor powers down afterwards.
const ONE_TIME_HIGH_RES_CMD: u8 = 0x20;
const ONE_TIME_HIGH_RES_2_CMD: u8 = 0x21;

// Change measurement time command prefixes (high and low register halves).
const MEASUREMENT_TIME_HIGH_BITS: u8 = 0x40;
const MEASUREMENT_TIME_LOW_BITS: u8 = 0x60;

const LOW_RES_MEASUREMENT_TIME_MS: u8 = 24;
const HIGH_RES_MEASUREMENT_TIME_MS: u8 = 180;

/// The two bus addresses the sensor can be strapped to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Address {
    /// ADDR pin floating or tied to GND.
    Low = 0x23,
    /// ADDR pin tied to VCC.
    High = 0x5C,
}

/// Measurement resolution of the sensor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// 4 lx per count, 24 ms measurement time.
    Low,
    /// 1 lx per count, 180 ms measurement time.
    High,
    /// 0.5 lx per count, 180 ms measurement time.
    High2,
}

/// Whether the sensor keeps measuring or powers down after each measurement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkMode {
    /// The sensor free-runs; only the first read starts a measurement.
    Continuous,
    /// Every read triggers a measurement, the sensor powers down afterwards.
    OneShot,
}

/// Driver configuration, captured at construction time.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Bus address the ADDR pin selects.
    pub address: Address,
    /// Measurement resolution.
    pub resolution: Resolution,
    /// Continuous or one-shot operation.
    pub work_mode: WorkMode,
    /// Let the driver retune the sensitivity when a reading saturates or
    /// reads zero. Excludes manual adjustment.
    pub auto_adjust: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: Address::Low,
            resolution: Resolution::High,
            work_mode: WorkMode::OneShot,
            auto_adjust: false,
        }
    }
}

/// Represents any error that may happen during communication.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error<E> {
    /// A bus transaction failed; carries the error the bus reported.
    Transport(E),
    /// The sensor did not acknowledge the presence probe.
    NotDetected,
    /// Requested sensitivity outside the 31..=254 register range.
    SensitivityOutOfRange,
    /// Manual adjustment attempted while automatic tuning owns the register.
    AutoAdjustEnabled,
}

impl<E> From<E> for Error<E> {
    fn from(e: E) -> Self {
        Self::Transport(e)
    }
}

/// Represents an I2C-connected BH1750 sensor.
#[derive(Copy, Clone, Debug)]
pub struct Bh1750<I2C> {
    /// Marker to satisfy the compiler.
    _i2c: core::marker::PhantomData<I2C>,

    /// Configuration captured at construction time.
    config: Config,

    /// Start-measurement command derived from resolution and work mode.
    command: u8,

    /// Wait between starting a measurement and fetching the result.
    measurement_time_ms: u8,

    /// Current value of the measurement time register.
    sensitivity: u8,

    /// In continuous mode, whether a start command is already out.
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

impl<I2C, E> Bh1750<I2C>
where
    I2C: embedded_hal::blocking::i2c::Write<Error = E>
        + embedded_hal::blocking::i2c::Read<Error = E>,
{
    /// Creates a connection with a BH1750 sensor via I2C.
    ///
    /// Derives the start command and measurement time from the
    /// configuration and probes the sensor with a power-on command. If the
    /// probe is not acknowledged no driver is returned. Constructing a new
    /// driver for the same sensor fully resets the session state.
    pub fn new(config: Config, i2c: &mut I2C) -> Result<Self, Error<E>> {
        let sensor = Self {
            _i2c: core::marker::PhantomData,
            command: start_command(config.resolution, config.work_mode),
            measurement_time_ms: measurement_time_ms(config.resolution),
            sensitivity: SENSITIVITY_DEFAULT,
            first_read_done: false,
            config,
        };

        i2c.write(sensor.address(), &[POWER_ON_CMD])
            .map_err(|_| Error::NotDetected)?;
        log::debug!("BH1750 answered at 0x{:02x}", sensor.address());

        Ok(sensor)
    }

    /// Measure the ambient light intensity in lux.
    ///
    /// In one-shot mode every call starts a measurement and blocks for the
    /// measurement time. In continuous mode only the first call does; later
    /// calls fetch the latest value the free-running sensor produced.
    ///
    /// With [`Config::auto_adjust`] enabled, a saturated (`0xFFFF`) or zero
    /// raw reading retunes the sensitivity one step and repeats the
    /// measurement, staying within the 31..=254 register range.
    pub fn read_lux(
        &mut self,
        delay: &mut impl embedded_hal::blocking::delay::DelayMs<u32>,
        i2c: &mut I2C,
    ) -> Result<f32, Error<E>> {
        // One budget step per retune keeps the loop finite even if the
        // sensor keeps flapping between saturated and zero readings.
        let mut retunes_left = SENSITIVITY_MAX - SENSITIVITY_MIN;
        loop {
            let raw = self.measure_raw(delay, i2c)?;
            if self.config.auto_adjust && retunes_left > 0 {
                let retuned = match raw {
                    u16::MAX if self.sensitivity > SENSITIVITY_MIN => {
                        self.write_sensitivity(self.sensitivity - 1, i2c)?;
                        true
                    }
                    0 if self.sensitivity < SENSITIVITY_MAX => {
                        self.write_sensitivity(self.sensitivity + 1, i2c)?;
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
    /// `value` must lie within 31..=254. Larger values make the sensor
    /// integrate longer, which raises the resolution of the reported lux
    /// value and is compensated in the conversion. Not available while
    /// [`Config::auto_adjust`] owns the register.
    pub fn adjust_sensitivity(&mut self, value: u8, i2c: &mut I2C) -> Result<(), Error<E>> {
        if !(SENSITIVITY_MIN..=SENSITIVITY_MAX).contains(&value) {
            return Err(Error::SensitivityOutOfRange);
        }
        if self.config.auto_adjust {
            return Err(Error::AutoAdjustEnabled);
        }
        self.write_sensitivity(value, i2c)
    }

    fn measure_raw(
        &mut self,
        delay: &mut impl embedded_hal::blocking::delay::DelayMs<u32>,
        i2c: &mut I2C,
    ) -> Result<u16, Error<E>> {
        let start_pending =
            !(self.config.work_mode == WorkMode::Continuous && self.first_read_done);
        if start_pending {
            i2c.write(self.address(), &[self.command])?;
            self.first_read_done = true;
            delay.delay_ms(self.measurement_time_ms as u32);
        }

        let mut data = [0u8; 2];
        i2c.read(self.address(), &mut data)?;
        let raw = u16::from_be_bytes(data);
        log::debug!("raw measurement: 0x{:04x}", raw);

        Ok(raw)
    }

    fn write_sensitivity(&mut self, value: u8, i2c: &mut I2C) -> Result<(), Error<E>> {
        let [high, low] = sensitivity_bytes(value);
        i2c.write(self.address(), &[high])?;
        i2c.write(self.address(), &[low])?;

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

pub(crate) fn start_command(resolution: Resolution, work_mode: WorkMode) -> u8 {
    match (resolution, work_mode) {
        (Resolution::Low, WorkMode::Continuous) => CONTINUOUS_LOW_RES_CMD,
        (Resolution::Low, WorkMode::OneShot) => ONE_TIME_LOW_RES_CMD,
        (Resolution::High, WorkMode::Continuous) => CONTINUOUS_HIGH_RES_CMD,
        (Resolution::High, WorkMode::OneShot) => ONE_TIME_HIGH_RES_CMD,
        (Resolution::High2, WorkMode::Continuous) => CONTINUOUS_HIGH_RES_2_CMD,
        (Resolution::High2, WorkMode::OneShot) => ONE_TIME_HIGH_RES_2_CMD,
    }
}

pub(crate) fn measurement_time_ms(resolution: Resolution) -> u8 {
    match resolution {
        Resolution::Low => LOW_RES_MEASUREMENT_TIME_MS,
        Resolution::High | Resolution::High2 => HIGH_RES_MEASUREMENT_TIME_MS,
    }
}

/// Splits a sensitivity value into the two change-measurement-time command
/// bytes, high half first.
pub(crate) fn sensitivity_bytes(value: u8) -> [u8; 2] {
    [
        (value >> 5) | MEASUREMENT_TIME_HIGH_BITS,
        (value & 0x1F) | MEASUREMENT_TIME_LOW_BITS,
    ]
}

/// Converts a raw register value into lux, compensating for the configured
/// sensitivity and resolution.
pub(crate) fn convert_raw(raw: u16, sensitivity: u8, resolution: Resolution) -> f32 {
    let lux = raw as f32 * (1.0 / 1.2) * (SENSITIVITY_DEFAULT as f32 / sensitivity as f32);
    if resolution == Resolution::High2 {
        lux / 2.0
    } else {
        lux
    }
}
