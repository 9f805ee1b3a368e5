// src/sampling/driver.rs
//! Sensor driver contract
//!
//! Concrete drivers live outside the runtime; the engine only relies on
//! this trait: a port that opens, reads one row of magnitudes, and
//! closes, plus static capability metadata. [`SimulatedSensor`] is the
//! built-in stand-in emitting pseudo-random readings.

use crate::utils::errors::{NodeError, Result};
use rand::Rng;

/// A sensor port the sampling layer can poll
pub trait Sensor: Send {
    /// Driver name; doubles as the worker name of its sampler
    fn name(&self) -> &str;

    /// Names of the magnitudes a reading carries, in order
    fn magnitudes(&self) -> &[&'static str];

    /// Highest sampling frequency the device supports, in Hz
    fn max_frequency(&self) -> f64;

    /// Frequency used when none is configured, in Hz
    fn default_frequency(&self) -> f64;

    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<()>;

    /// Read one row of magnitudes. Fails when the port is not open.
    fn read(&mut self) -> Result<Vec<f64>>;

    fn close(&mut self) -> Result<()>;
}

/// Driver emitting pseudo-random readings, for nodes without hardware
pub struct SimulatedSensor {
    name: String,
    is_open: bool,
}

impl SimulatedSensor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_open: false,
        }
    }
}

impl Sensor for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn magnitudes(&self) -> &[&'static str] {
        &["magnitude", "dispersion"]
    }

    fn max_frequency(&self) -> f64 {
        50.0
    }

    fn default_frequency(&self) -> f64 {
        10.0
    }

    fn is_open(&self) -> bool {
        self.is_open
    }

    fn open(&mut self) -> Result<()> {
        self.is_open = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<f64>> {
        if !self.is_open {
            return Err(NodeError::PortNotOpen);
        }

        let mut rng = rand::thread_rng();
        Ok(vec![rng.gen::<f64>() * 100.0, rng.gen::<f64>()])
    }

    fn close(&mut self) -> Result<()> {
        self.is_open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_requires_open_port() {
        let mut sensor = SimulatedSensor::new("torque");
        assert!(!sensor.is_open());
        assert!(matches!(sensor.read(), Err(NodeError::PortNotOpen)));

        sensor.open().unwrap();
        let row = sensor.read().unwrap();
        assert_eq!(row.len(), sensor.magnitudes().len());

        sensor.close().unwrap();
        assert!(matches!(sensor.read(), Err(NodeError::PortNotOpen)));
    }
}
