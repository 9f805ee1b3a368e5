// src/sampling/interpreter.rs
//! Default command interpreter over the sampling layer
//!
//! Commands use the `command --kwargs {JSON}` syntax. The `updates`
//! command pages buffered sensor rows out to clients against a moving
//! per-sensor cursor.

use crate::sampling::sampler::SamplingUnit;
use crate::sampling::SensorReader;
use crate::wire::interpreter::{
    parse_command, CommandInterpreter, CommandOutput, EvaluationError,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Interpreter exposing the sampling buffers over the wire service
pub struct SamplingInterpreter {
    readers: HashMap<String, Arc<SensorReader>>,
}

impl SamplingInterpreter {
    pub fn new(unit: &SamplingUnit) -> Self {
        Self {
            readers: unit.readers().clone(),
        }
    }

    /// `updates [--kwargs {"last_key": {<sensor>: <cursor>}}]`
    fn updates(
        &self,
        kwargs: Option<Value>,
    ) -> std::result::Result<CommandOutput, EvaluationError> {
        let cursors = Self::parse_cursors(kwargs)?;

        let mut response = serde_json::Map::new();
        for (name, reader) in &self.readers {
            let cursor = cursors
                .as_ref()
                .and_then(|map| map.get(name).copied().flatten());
            let update = reader.retrieve_last(cursor);
            response.insert(
                name.clone(),
                serde_json::to_value(update).unwrap_or(Value::Null),
            );
        }

        Ok(CommandOutput::Json(Value::Object(response)))
    }

    fn parse_cursors(
        kwargs: Option<Value>,
    ) -> std::result::Result<Option<HashMap<String, Option<usize>>>, EvaluationError> {
        let Some(kwargs) = kwargs else {
            return Ok(None);
        };

        let Value::Object(map) = kwargs else {
            return Err(EvaluationError::InvalidArguments);
        };

        if map.keys().any(|key| key != "last_key") {
            return Err(EvaluationError::InvalidArguments);
        }

        match map.get("last_key") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| EvaluationError::InvalidArguments),
        }
    }
}

#[async_trait]
impl CommandInterpreter for SamplingInterpreter {
    async fn interpret(
        &self,
        command: &str,
    ) -> std::result::Result<CommandOutput, EvaluationError> {
        let (command, kwargs) = parse_command(command)?;

        match command.as_str() {
            "updates" => self.updates(kwargs),
            _ => Err(EvaluationError::UnrecognizedCommand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::driver::SimulatedSensor;
    use serde_json::json;

    fn unit_with_rows(rows: usize) -> SamplingUnit {
        let mut unit = SamplingUnit::new();
        unit.add_sensor(Box::new(SimulatedSensor::new("torque")), None)
            .unwrap();
        let reader = unit.reader("torque").unwrap();
        for _ in 0..rows {
            reader.update().unwrap();
        }
        unit
    }

    #[tokio::test]
    async fn test_updates_returns_buffered_rows() {
        let unit = unit_with_rows(3);
        let interpreter = SamplingInterpreter::new(&unit);

        let output = interpreter.interpret("updates").await.unwrap();
        let CommandOutput::Json(value) = output else {
            panic!("expected a JSON output");
        };

        assert_eq!(value["torque"]["last_key"], json!(2));
        assert_eq!(value["torque"]["rows"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_updates_honours_cursor() {
        let unit = unit_with_rows(3);
        let interpreter = SamplingInterpreter::new(&unit);

        let output = interpreter
            .interpret("updates --kwargs {\"last_key\": {\"torque\": 1}}")
            .await
            .unwrap();
        let CommandOutput::Json(value) = output else {
            panic!("expected a JSON output");
        };

        assert_eq!(value["torque"]["rows"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_command_is_unrecognized() {
        let unit = unit_with_rows(0);
        let interpreter = SamplingInterpreter::new(&unit);

        assert!(matches!(
            interpreter.interpret("bogus").await,
            Err(EvaluationError::UnrecognizedCommand)
        ));
    }

    #[tokio::test]
    async fn test_unexpected_kwargs_are_invalid_arguments() {
        let unit = unit_with_rows(0);
        let interpreter = SamplingInterpreter::new(&unit);

        assert!(matches!(
            interpreter
                .interpret("updates --kwargs {\"page\": 2}")
                .await,
            Err(EvaluationError::InvalidArguments)
        ));

        assert!(matches!(
            interpreter
                .interpret("updates --kwargs {\"last_key\": \"nope\"}")
                .await,
            Err(EvaluationError::InvalidArguments)
        ));
    }
}
