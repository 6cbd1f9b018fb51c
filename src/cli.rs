//! Minimal CLI parsing for one-shot read operations.

use std::env;

use anyhow::{Result, bail};

pub const USAGE: &str = "usage: crm-data <find|first|unique|count|aggregate> <table> [descriptor-json] [--schema <name>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Find,
    First,
    Unique,
    Count,
    Aggregate,
}

impl Command {
    pub fn from_arg(value: &str) -> Option<Self> {
        match value {
            "find" | "find-many" => Some(Command::Find),
            "first" | "find-first" => Some(Command::First),
            "unique" | "find-unique" => Some(Command::Unique),
            "count" => Some(Command::Count),
            "aggregate" => Some(Command::Aggregate),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct CliOptions {
    pub command: Command,
    pub table: String,
    /// Query descriptor as JSON text, `{}` when omitted
    pub descriptor: String,
    pub schema_override: Option<String>,
}

impl CliOptions {
    pub fn from_args() -> Result<Self> {
        Self::parse(env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut positional = Vec::new();
        let mut schema_override = None;
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--schema" => schema_override = args.next(),
                _ if arg.starts_with("--schema=") => {
                    schema_override = arg.split_once('=').map(|(_, v)| v.to_string());
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let Some(command) = positional.next() else {
            bail!(USAGE);
        };
        let Some(command) = Command::from_arg(&command) else {
            bail!("unknown command '{command}'\n{USAGE}");
        };
        let Some(table) = positional.next() else {
            bail!(USAGE);
        };

        Ok(Self {
            command,
            table,
            descriptor: positional.next().unwrap_or_else(|| "{}".to_string()),
            schema_override,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions> {
        CliOptions::parse(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn test_parses_command_table_and_descriptor() {
        let options = parse(&["count", "orders", r#"{"where":{"status":"open"}}"#]).unwrap();
        assert_eq!(options.command, Command::Count);
        assert_eq!(options.table, "orders");
        assert!(options.descriptor.contains("status"));
        assert_eq!(options.schema_override, None);
    }

    #[test]
    fn test_descriptor_defaults_to_empty_object() {
        let options = parse(&["--schema=erp", "find", "customers"]).unwrap();
        assert_eq!(options.descriptor, "{}");
        assert_eq!(options.schema_override.as_deref(), Some("erp"));
    }

    #[test]
    fn test_rejects_unknown_command_and_missing_table() {
        assert!(parse(&["drop", "orders"]).is_err());
        assert!(parse(&["find"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
