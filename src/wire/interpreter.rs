// src/wire/interpreter.rs
//! Command interpreter boundary
//!
//! The wire server dispatches every decoded request to a single
//! evaluation entry point. Implementations return a serialisable value or
//! one of the evaluation failures, which the server converts into a
//! structured, recoverable client response.

use crate::utils::errors::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

/// Evaluation failures surfaced to wire clients as `KNOWN_ERR`
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("The command specified has not been recognized by the interpreter.")]
    UnrecognizedCommand,

    #[error("The command syntax is invalid. {0}")]
    InvalidCommand(String),

    #[error("The command arguments passed are not valid arguments for the function specified.")]
    InvalidArguments,
}

impl EvaluationError {
    /// Error kind identifier placed on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            EvaluationError::UnrecognizedCommand => "UnrecognizedCommandError",
            EvaluationError::InvalidCommand(_) => "InvalidCommandError",
            EvaluationError::InvalidArguments => "InvalidArgumentsError",
        }
    }
}

/// Value returned by a successful evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl CommandOutput {
    /// Type name placed in the `data_type` response frame
    pub fn type_name(&self) -> &'static str {
        match self {
            CommandOutput::Text(_) => "str",
            CommandOutput::Bytes(_) => "bytes",
            CommandOutput::Json(_) => "json",
        }
    }

    /// Serialise the value for the payload frame.
    pub fn to_payload(&self) -> Result<Bytes> {
        match self {
            CommandOutput::Text(text) => Ok(Bytes::copy_from_slice(text.as_bytes())),
            CommandOutput::Bytes(raw) => Ok(Bytes::copy_from_slice(raw)),
            CommandOutput::Json(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
        }
    }
}

/// Single evaluation entry point the wire server dispatches to
#[async_trait]
pub trait CommandInterpreter: Send + Sync {
    async fn interpret(&self, command: &str)
        -> std::result::Result<CommandOutput, EvaluationError>;
}

/// Split a raw request into command name and decoded `--kwargs` JSON.
///
/// Command syntax: `command [--kwargs {JSON}]`. JSON keeps the argument
/// surface injection-free; anything else is a syntax failure.
pub fn parse_command(raw: &str) -> std::result::Result<(String, Option<Value>), EvaluationError> {
    let mut parts = raw.trim().splitn(2, ' ');
    let command = match parts.next() {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => return Err(EvaluationError::InvalidCommand("Empty command.".into())),
    };

    let kwargs = match parts.next().map(str::trim) {
        None | Some("") => None,
        Some(rest) => {
            let json = rest
                .strip_prefix("--kwargs")
                .ok_or_else(|| {
                    EvaluationError::InvalidCommand(format!("Unexpected argument '{}'.", rest))
                })?
                .trim();
            if json.is_empty() {
                None
            } else {
                Some(serde_json::from_str(json).map_err(|_| {
                    EvaluationError::InvalidCommand("Keyword arguments are not valid JSON.".into())
                })?)
            }
        }
    };

    Ok((command, kwargs))
}

/// Build a request string in the `command --kwargs {JSON}` syntax.
pub fn build_command(name: &str, kwargs: Option<&Value>) -> String {
    match kwargs {
        Some(value) => format!("{} --kwargs {}", name, value),
        None => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kinds_identify_exception_types() {
        assert_eq!(
            EvaluationError::UnrecognizedCommand.kind(),
            "UnrecognizedCommandError"
        );
        assert_eq!(
            EvaluationError::InvalidCommand(String::new()).kind(),
            "InvalidCommandError"
        );
        assert_eq!(EvaluationError::InvalidArguments.kind(), "InvalidArgumentsError");
    }

    #[test]
    fn test_parse_bare_command() {
        let (command, kwargs) = parse_command("updates").unwrap();
        assert_eq!(command, "updates");
        assert!(kwargs.is_none());
    }

    #[test]
    fn test_parse_command_with_kwargs() {
        let (command, kwargs) = parse_command("updates --kwargs {\"last_key\": {\"a\": 3}}").unwrap();
        assert_eq!(command, "updates");
        assert_eq!(kwargs.unwrap(), json!({"last_key": {"a": 3}}));
    }

    #[test]
    fn test_parse_bad_json_is_invalid_command() {
        assert!(matches!(
            parse_command("updates --kwargs {not json}"),
            Err(EvaluationError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_parse_unknown_flag_is_invalid_command() {
        assert!(matches!(
            parse_command("updates --verbose"),
            Err(EvaluationError::InvalidCommand(_))
        ));
    }

    #[test]
    fn test_build_then_parse_roundtrip() {
        let built = build_command("updates", Some(&json!({"last_key": null})));
        let (command, kwargs) = parse_command(&built).unwrap();
        assert_eq!(command, "updates");
        assert_eq!(kwargs.unwrap(), json!({"last_key": null}));
    }

    #[test]
    fn test_output_type_names() {
        assert_eq!(CommandOutput::Text("x".into()).type_name(), "str");
        assert_eq!(CommandOutput::Bytes(vec![1]).type_name(), "bytes");
        assert_eq!(CommandOutput::Json(json!(1)).type_name(), "json");
    }
}
