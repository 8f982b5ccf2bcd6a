use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::command_registry::{
    CommandSpec, ADJUST_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, REVERT_COMMAND,
    SINGLE_PATH_COMMANDS, STRAIGHTEN_COMMAND,
};
use crate::presets::Adjustment;

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_integer_arg(arg: &str) -> Value {
    arg.trim()
        .trim_start_matches('+')
        .parse::<i64>()
        .map(|value| Value::Number(value.into()))
        .unwrap_or(Value::Null)
}

/// `exposure=20 contrast=-10` style pairs. Unknown sliders or non-numeric
/// values are reported back under `invalid`.
fn parse_adjustment_args(arg: &str) -> (Map<String, Value>, Vec<Value>) {
    let mut values = Map::new();
    let mut invalid = Vec::new();
    for part in arg
        .replace(',', " ")
        .split_whitespace()
        .filter(|value| !value.is_empty())
    {
        let parsed = part.split_once(['=', ':']).and_then(|(key, value)| {
            let adjustment = Adjustment::parse(key)?;
            let number = value.trim_start_matches('+').parse::<i64>().ok()?;
            Some((adjustment, number))
        });
        match parsed {
            Some((adjustment, number)) => {
                values.insert(
                    adjustment.key().to_string(),
                    Value::Number(number.clamp(-100, 100).into()),
                );
            }
            None => invalid.push(Value::String(part.to_string())),
        }
    }
    (values, invalid)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text)
                    .with_arg("text", Value::String(arg.to_string()));
                if action == "edit" || action == "animate" {
                    intent.prompt = Some(arg.to_string()).filter(|value| !value.is_empty());
                }
                return intent;
            }

            if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
                return Intent::new(action, text)
                    .with_arg("path", Value::String(parse_single_path_arg(arg)));
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == REVERT_COMMAND.command {
                return Intent::new(REVERT_COMMAND.action, text)
                    .with_arg("index", parse_integer_arg(arg));
            }

            if command == STRAIGHTEN_COMMAND.command {
                return Intent::new(STRAIGHTEN_COMMAND.action, text)
                    .with_arg("angle", parse_integer_arg(arg));
            }

            if command == ADJUST_COMMAND.command {
                let (values, invalid) = parse_adjustment_args(arg);
                return Intent::new(ADJUST_COMMAND.action, text)
                    .with_arg("adjustments", Value::Object(values))
                    .with_arg("invalid", Value::Array(invalid));
            }

            return Intent::new("unknown", text)
                .with_arg("command", Value::String(command))
                .with_arg("arg", Value::String(arg.to_string()));
        }
    }

    let mut intent = Intent::new("edit", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
