pub mod commands;

use clap::ValueEnum;
use plotter_core::CommandKind;

#[derive(ValueEnum, Clone, Debug, Copy)]
pub enum CliCommand {
    Start,
    Stop,
    Pause,
}

impl From<CliCommand> for CommandKind {
    fn from(c: CliCommand) -> Self {
        match c {
            CliCommand::Start => CommandKind::Start,
            CliCommand::Stop => CommandKind::Stop,
            CliCommand::Pause => CommandKind::Pause,
        }
    }
}

/// Parse `key=value`; the value is read as JSON when it parses, else kept as a string.
pub fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in `{raw}`"));
    }
    let value = serde_json::from_str(value.trim())
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
