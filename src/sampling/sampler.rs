// src/sampling/sampler.rs
//! Background sampling built on loop workers
//!
//! A [`SensorReader`] buffers timestamped rows read from one sensor; its
//! sampler is a loop worker polling `update()` at `1/frequency`. The
//! [`SamplingUnit`] groups the samplers of a node under one registry and
//! starts and stops them together.

use crate::runtime::registry::Registry;
use crate::runtime::shared::{task_body, LoopHandle, SharedWorker};
use crate::sampling::driver::Sensor;
use crate::utils::errors::{NodeError, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One buffered reading
#[derive(Debug, Clone, Serialize)]
pub struct SampleRow {
    pub values: Vec<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Page of rows returned by [`SensorReader::retrieve_last`]
#[derive(Debug, Clone, Serialize)]
pub struct SensorUpdate {
    /// Cursor to pass back on the next request; `None` while the buffer
    /// is empty
    pub last_key: Option<usize>,
    pub rows: Vec<SampleRow>,
}

/// In-memory buffer of rows read from one sensor
pub struct SensorReader {
    sensor: Mutex<Box<dyn Sensor>>,
    name: String,
    columns: Vec<String>,
    max_frequency: f64,
    default_frequency: f64,
    rows: RwLock<Vec<SampleRow>>,
}

impl SensorReader {
    pub fn new(sensor: Box<dyn Sensor>) -> Self {
        let name = sensor.name().to_string();
        let mut columns: Vec<String> = sensor.magnitudes().iter().map(|m| m.to_string()).collect();
        columns.push("timestamp".to_string());
        let max_frequency = sensor.max_frequency();
        let default_frequency = sensor.default_frequency();

        Self {
            sensor: Mutex::new(sensor),
            name,
            columns,
            max_frequency,
            default_frequency,
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn sensor_name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn max_frequency(&self) -> f64 {
        self.max_frequency
    }

    pub fn default_frequency(&self) -> f64 {
        self.default_frequency
    }

    /// Open the underlying sensor port.
    pub fn open(&self) -> Result<()> {
        self.sensor.lock().open()
    }

    /// Close the underlying sensor port.
    pub fn close(&self) -> Result<()> {
        self.sensor.lock().close()
    }

    /// Poll the sensor once and buffer the stamped row.
    pub fn update(&self) -> Result<()> {
        let values = self.sensor.lock().read()?;
        self.rows.write().push(SampleRow {
            values,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Number of buffered rows
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Rows buffered after `cursor`, with the new cursor.
    ///
    /// Slicing against a moving cursor gives clients pagination without
    /// the buffer being copied for rows they already saw.
    pub fn retrieve_last(&self, cursor: Option<usize>) -> SensorUpdate {
        let rows = self.rows.read();
        let start = cursor.map(|key| key + 1).unwrap_or(0).min(rows.len());

        SensorUpdate {
            last_key: if rows.is_empty() {
                None
            } else {
                Some(rows.len() - 1)
            },
            rows: rows[start..].to_vec(),
        }
    }
}

/// Build the loop worker sampling `reader` at `frequency` (falling back
/// to the sensor default). The frequency must lie in `(0, max]`.
pub fn make_sampler(reader: Arc<SensorReader>, frequency: Option<f64>) -> Result<SharedWorker> {
    let max = reader.max_frequency();
    let frequency = frequency.unwrap_or_else(|| reader.default_frequency());

    if !(frequency > 0.0 && frequency <= max) {
        return Err(NodeError::InvalidFrequency {
            got: frequency,
            max,
        });
    }

    let interval = Duration::from_secs_f64(1.0 / frequency);
    let name = reader.sensor_name().to_string();

    SharedWorker::new_loop(
        name,
        interval,
        task_body(move |_ctx| {
            let reader = reader.clone();
            async move { reader.update() }
        }),
    )
}

/// The samplers of one node, grouped under a registry
pub struct SamplingUnit {
    registry: Registry,
    readers: HashMap<String, Arc<SensorReader>>,
    loops: Vec<LoopHandle>,
}

impl SamplingUnit {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            readers: HashMap::new(),
            loops: Vec::new(),
        }
    }

    /// Open a sensor and register its sampler.
    pub fn add_sensor(&mut self, sensor: Box<dyn Sensor>, frequency: Option<f64>) -> Result<()> {
        let reader = SensorReader::new(sensor);
        reader.open()?;
        let reader = Arc::new(reader);

        let sampler = make_sampler(reader.clone(), frequency)?;
        let handle = sampler.loop_handle()?;
        let name = reader.sensor_name().to_string();

        self.registry.add(Box::new(sampler))?;
        self.readers.insert(name, reader);
        self.loops.push(handle);
        Ok(())
    }

    /// Start every sampler.
    pub async fn init(&mut self) -> Result<()> {
        if self.readers.is_empty() {
            warn!("no sensors have been enabled");
        }

        self.registry.start_all().await?;
        info!("sampling unit started with {} sensor(s)", self.readers.len());
        Ok(())
    }

    /// Stop every sampler loop; in-flight reads finish.
    pub fn stop(&self) {
        for handle in &self.loops {
            handle.stop();
        }
    }

    /// Readers by sensor name
    pub fn readers(&self) -> &HashMap<String, Arc<SensorReader>> {
        &self.readers
    }

    pub fn reader(&self, name: &str) -> Option<Arc<SensorReader>> {
        self.readers.get(name).cloned()
    }
}

impl Default for SamplingUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::driver::SimulatedSensor;

    #[test]
    fn test_frequency_bounds_enforced() {
        let reader = Arc::new(SensorReader::new(Box::new(SimulatedSensor::new("s"))));

        assert!(matches!(
            make_sampler(reader.clone(), Some(0.0)),
            Err(NodeError::InvalidFrequency { .. })
        ));
        assert!(matches!(
            make_sampler(reader.clone(), Some(51.0)),
            Err(NodeError::InvalidFrequency { .. })
        ));
        assert!(make_sampler(reader, Some(50.0)).is_ok());
    }

    #[test]
    fn test_retrieve_last_pages_with_cursor() {
        let reader = SensorReader::new(Box::new(SimulatedSensor::new("s")));
        reader.open().unwrap();

        let first = reader.retrieve_last(None);
        assert_eq!(first.last_key, None);
        assert!(first.rows.is_empty());

        for _ in 0..3 {
            reader.update().unwrap();
        }

        let page = reader.retrieve_last(None);
        assert_eq!(page.last_key, Some(2));
        assert_eq!(page.rows.len(), 3);

        // nothing new after the cursor
        let empty = reader.retrieve_last(page.last_key);
        assert_eq!(empty.last_key, Some(2));
        assert!(empty.rows.is_empty());

        reader.update().unwrap();
        let next = reader.retrieve_last(page.last_key);
        assert_eq!(next.last_key, Some(3));
        assert_eq!(next.rows.len(), 1);
    }

    #[tokio::test]
    async fn test_sampling_unit_buffers_in_background() {
        let mut unit = SamplingUnit::new();
        unit.add_sensor(Box::new(SimulatedSensor::new("torque")), Some(50.0))
            .unwrap();
        unit.init().await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        unit.stop();

        let reader = unit.reader("torque").unwrap();
        assert!(reader.len() >= 2);
    }

    #[test]
    fn test_columns_include_timestamp() {
        let reader = SensorReader::new(Box::new(SimulatedSensor::new("s")));
        assert_eq!(
            reader.columns(),
            &["magnitude".to_string(), "dispersion".to_string(), "timestamp".to_string()]
        );
    }
}
