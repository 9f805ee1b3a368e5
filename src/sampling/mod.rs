// src/sampling/mod.rs
//! Background sensor sampling
//!
//! - **driver**: the sensor port contract and the simulated driver
//! - **sampler**: buffering readers and their loop workers
//! - **interpreter**: the default wire interpreter over the buffers

pub mod driver;
pub mod interpreter;
pub mod sampler;

pub use driver::{Sensor, SimulatedSensor};
pub use interpreter::SamplingInterpreter;
pub use sampler::{make_sampler, SampleRow, SamplingUnit, SensorReader, SensorUpdate};
