//! Command taxonomy and parsing of model replies.
//!
//! The model is asked to answer with a JSON array of command objects. This
//! module turns such a reply into a validated [`CommandBatch`]. The top level
//! is strict: anything that is not a JSON array is not a batch at all. Elements
//! are handled leniently: an element with an unknown type or a missing
//! parameter is skipped with a warning and the rest of the batch survives.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of actions the model may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    OpenTerminalAndExecute,
    OpenApplication,
    OpenUrl,
}

impl CommandType {
    pub const ALL: [CommandType; 3] = [
        CommandType::OpenTerminalAndExecute,
        CommandType::OpenApplication,
        CommandType::OpenUrl,
    ];

    /// Name used on the wire, in `command_type`.
    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandType::OpenTerminalAndExecute => "open_terminal_and_execute",
            CommandType::OpenApplication => "open_application",
            CommandType::OpenUrl => "open_url",
        }
    }

    /// The parameter that must be present and non-empty for this type.
    pub fn required_parameter(&self) -> &'static str {
        match self {
            CommandType::OpenTerminalAndExecute => "command",
            CommandType::OpenApplication => "application_name",
            CommandType::OpenUrl => "url",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.wire_name() == name)
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A validated command.
///
/// Only [`parse`] and [`Command::new`] build these, and both check that the
/// required parameter of the type is present and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    command_type: CommandType,
    parameters: BTreeMap<String, String>,
}

impl Command {
    /// Builds a command, rejecting it if the required parameter is missing.
    pub fn new(
        command_type: CommandType,
        parameters: BTreeMap<String, String>,
    ) -> Result<Self, MissingParameter> {
        let required = command_type.required_parameter();
        match parameters.get(required) {
            Some(value) if !value.trim().is_empty() => Ok(Self {
                command_type,
                parameters,
            }),
            _ => Err(MissingParameter {
                command_type,
                parameter: required,
            }),
        }
    }

    pub fn command_type(&self) -> CommandType {
        self.command_type
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }

    /// Value of the required parameter; always present on a validated command.
    pub fn target(&self) -> &str {
        self.parameters
            .get(self.command_type.required_parameter())
            .map(String::as_str)
            .unwrap_or_default()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.command_type, self.parameters)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingParameter {
    pub command_type: CommandType,
    pub parameter: &'static str,
}

impl fmt::Display for MissingParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' parameter is missing for {}",
            self.parameter, self.command_type
        )
    }
}

/// An ordered list of commands taken from one model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBatch(Vec<Command>);

impl CommandBatch {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.0.iter()
    }
}

impl From<Vec<Command>> for CommandBatch {
    fn from(commands: Vec<Command>) -> Self {
        Self(commands)
    }
}

impl IntoIterator for CommandBatch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Why a reply did not produce a batch. Not an error: the reply is plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    NotACommandBatch,
}

/// Parses a model reply into a batch of validated commands.
pub fn parse(raw: &str) -> Result<CommandBatch, ParseOutcome> {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            debug!("Reply is not JSON ({e}), treating it as text");
            return Err(ParseOutcome::NotACommandBatch);
        }
    };
    let Value::Array(elements) = value else {
        debug!("Reply is JSON but not an array, treating it as text");
        return Err(ParseOutcome::NotACommandBatch);
    };

    let commands = elements
        .into_iter()
        .enumerate()
        .filter_map(|(index, element)| match parse_element(element) {
            Ok(command) => Some(command),
            Err(reason) => {
                warn!("Skipping command #{index}: {reason}");
                None
            }
        })
        .collect::<Vec<_>>();
    Ok(CommandBatch(commands))
}

fn parse_element(element: Value) -> Result<Command, String> {
    let Value::Object(mut object) = element else {
        return Err(format!("expected an object, got {element}"));
    };
    let command_type = match object.get("command_type") {
        Some(Value::String(name)) => CommandType::from_wire(name)
            .ok_or_else(|| format!("unknown command type: {name}"))?,
        Some(other) => return Err(format!("command_type is not a string: {other}")),
        None => return Err("command_type is missing".to_string()),
    };
    let parameters = match object.remove("parameters") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(s) => Some((name, s)),
                Value::Number(_) | Value::Bool(_) => Some((name, value.to_string())),
                other => {
                    debug!("Dropping non-scalar parameter {name} = {other}");
                    None
                }
            })
            .collect(),
        Some(other) => return Err(format!("parameters is not an object: {other}")),
    };
    Command::new(command_type, parameters).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_valid_batch_keeps_order_and_fields() {
        let raw = r#"[
            {"command_type": "open_terminal_and_execute", "parameters": {"command": "ls -l"}},
            {"command_type": "open_application", "parameters": {"application_name": "notepad"}},
            {"command_type": "open_url", "parameters": {"url": "https://google.com", "extra": "kept"}}
        ]"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.len(), 3);
        let commands: Vec<_> = batch.into_iter().collect();
        assert_eq!(
            commands[0].command_type(),
            CommandType::OpenTerminalAndExecute
        );
        assert_eq!(commands[0].target(), "ls -l");
        assert_eq!(commands[1].command_type(), CommandType::OpenApplication);
        assert_eq!(commands[1].target(), "notepad");
        assert_eq!(commands[2].command_type(), CommandType::OpenUrl);
        assert_eq!(
            commands[2].parameters(),
            &params(&[("url", "https://google.com"), ("extra", "kept")])
        );
    }

    #[test]
    fn test_non_array_json_is_not_a_batch() {
        for raw in [
            r#"{"command_type": "open_url", "parameters": {"url": "x"}}"#,
            "42",
            r#""open google""#,
            "null",
            "true",
        ] {
            assert_eq!(parse(raw), Err(ParseOutcome::NotACommandBatch), "{raw}");
        }
    }

    #[test]
    fn test_invalid_json_is_not_a_batch() {
        for raw in ["I don't understand.", "", "[{", "```json\n[]\n```"] {
            assert_eq!(parse(raw), Err(ParseOutcome::NotACommandBatch), "{raw}");
        }
    }

    #[test]
    fn test_missing_required_parameter_is_skipped() {
        let raw = r#"[
            {"command_type": "open_url", "parameters": {"url": "https://example.com"}},
            {"command_type": "open_application", "parameters": {}}
        ]"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.len(), 1);
        let command = batch.iter().next().unwrap();
        assert_eq!(command.command_type(), CommandType::OpenUrl);
        assert_eq!(command.target(), "https://example.com");
    }

    #[test]
    fn test_unknown_and_malformed_elements_are_skipped() {
        let raw = r#"[
            {"command_type": "format_disk", "parameters": {"drive": "C:"}},
            "open_url",
            {"parameters": {"url": "https://example.com"}},
            {"command_type": 3},
            {"command_type": "open_url", "parameters": "https://example.com"},
            {"command_type": "open_application", "parameters": {"application_name": "   "}},
            {"command_type": "open_application", "parameters": {"application_name": "code"}}
        ]"#;
        let batch = parse(raw).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.iter().next().unwrap().target(), "code");
    }

    #[test]
    fn test_empty_array_is_an_empty_batch() {
        assert_eq!(parse("[]"), Ok(CommandBatch::default()));
        let filtered = parse(r#"[{"command_type": "open_url"}]"#).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_scalar_parameters_are_stringified() {
        let raw = r#"[{"command_type": "open_terminal_and_execute",
                       "parameters": {"command": "sleep", "seconds": 5, "wait": true, "env": {"A": "1"}}}]"#;
        let batch = parse(raw).unwrap();
        let command = batch.iter().next().unwrap();
        assert_eq!(
            command.parameters(),
            &params(&[("command", "sleep"), ("seconds", "5"), ("wait", "true")])
        );
    }

    #[test]
    fn test_command_new_validates() {
        let err = Command::new(CommandType::OpenUrl, BTreeMap::new()).unwrap_err();
        assert_eq!(err.parameter, "url");
        assert_eq!(err.to_string(), "'url' parameter is missing for open_url");
        assert!(Command::new(CommandType::OpenUrl, params(&[("url", "https://a.b")])).is_ok());
    }

    #[test]
    fn test_wire_names_round_trip() {
        for command_type in CommandType::ALL {
            assert_eq!(
                CommandType::from_wire(command_type.wire_name()),
                Some(command_type)
            );
            let json = serde_json::to_string(&command_type).unwrap();
            assert_eq!(json, format!("\"{}\"", command_type.wire_name()));
        }
        assert_eq!(CommandType::from_wire("OpenUrl"), None);
    }
}
