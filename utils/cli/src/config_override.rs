//! Support for `-c key=value` overrides shared across wikihist subcommands.
//!
//! Keys are dotted paths into the TOML config (`filter.max_title_len`). Values
//! are parsed as a TOML value first so numbers, booleans and arrays keep their
//! types; anything that does not parse is taken as a bare string.

use clap::ArgAction;
use clap::Parser;
use toml::Value;

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a configuration value that would otherwise be loaded from
    /// `config.toml`. Use a dotted path (`filter.max_title_len=8`) to override
    /// nested values. The value is parsed as TOML; if that fails it is used as
    /// a string.
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
        global = true,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    /// Parse the raw strings into `(dotted key, value)` pairs.
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, String> {
        self.raw_overrides
            .iter()
            .map(|raw| {
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| format!("override `{raw}` is missing '='"))?;
                let key = key.trim();
                if key.split('.').any(str::is_empty) {
                    return Err(format!("override `{raw}` has an empty key segment"));
                }
                let value = value.trim();
                let value = value
                    .parse::<Value>()
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Set every override on `target`. Missing tables along a key are
    /// created; a key that runs through a non-table value is an error.
    pub fn apply_on_value(&self, target: &mut Value) -> Result<(), String> {
        for (key, value) in self.parse_overrides()? {
            set_dotted(target, &key, value)?;
        }
        Ok(())
    }
}

fn set_dotted(root: &mut Value, key: &str, value: Value) -> Result<(), String> {
    let (parents, leaf) = match key.rsplit_once('.') {
        Some((parents, leaf)) => (Some(parents), leaf),
        None => (None, key),
    };
    let mut table = root
        .as_table_mut()
        .ok_or_else(|| format!("cannot set `{key}`: the config root is not a table"))?;
    let mut walked = String::new();
    for segment in parents.into_iter().flat_map(|parents| parents.split('.')) {
        if !walked.is_empty() {
            walked.push('.');
        }
        walked.push_str(segment);
        let entry = table
            .entry(segment)
            .or_insert_with(|| Value::Table(toml::Table::new()));
        let kind = entry.type_str();
        table = entry
            .as_table_mut()
            .ok_or_else(|| format!("cannot set `{key}`: `{walked}` holds a {kind} value"))?;
    }
    table.insert(leaf.to_string(), value);
    Ok(())
}
