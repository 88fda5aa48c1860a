//! `uci` command rendering and `uci show` parsing.

use super::options::{DeviceOptions, OptionValue};
use crate::ssh::shell_quote;

pub fn set(path: &str, value: &str) -> String {
    format!("uci set {}={}", path, shell_quote(value))
}

/// Replaces a list option: delete (ignoring absence), then one `add_list` per item.
pub fn set_list(path: &str, values: &[String]) -> Vec<String> {
    let mut commands = vec![format!("uci -q delete {} || true", path)];
    commands.extend(
        values
            .iter()
            .map(|v| format!("uci add_list {}={}", path, shell_quote(v))),
    );
    commands
}

/// Commands writing every option under `section` (e.g. `data_sender.3`).
pub fn option_commands(section: &str, options: &DeviceOptions) -> Vec<String> {
    let mut commands = Vec::new();
    for (key, value) in options.iter() {
        let path = format!("{}.{}", section, key);
        match value {
            OptionValue::Single(v) => commands.push(set(&path, v)),
            OptionValue::List(items) => commands.extend(set_list(&path, items)),
        }
    }
    commands
}

pub fn commit(config: &str) -> String {
    format!("uci commit {}", config)
}

fn unquote(value: &str) -> &str {
    value.trim().trim_matches(|c| c == '\'' || c == '"')
}

/// Value part of a single `uci show config.section.option` line.
pub fn value(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains('='))?;
    line.split_once('=').map(|(_, v)| unquote(v).to_string())
}

/// `(path, value)` pairs of a `uci show` listing, quotes stripped.
pub fn entries(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), unquote(v).to_string()))
        .collect()
}

/// Section declarations (`config.id=type`) of a `uci show config` listing.
pub fn sections(output: &str, config: &str) -> Vec<(String, String)> {
    let prefix = format!("{}.", config);
    entries(output)
        .into_iter()
        .filter_map(|(path, value)| {
            let id = path.strip_prefix(&prefix)?;
            if id.contains('.') {
                None
            } else {
                Some((id.to_string(), value))
            }
        })
        .collect()
}

/// Option value of `config.section.option` in a `uci show config` listing.
pub fn lookup<'a>(entries: &'a [(String, String)], path: &str) -> Option<&'a str> {
    entries
        .iter()
        .find(|(k, _)| k == path)
        .map(|(_, v)| v.as_str())
}
