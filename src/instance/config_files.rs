//! Enforce declared key/value pairs in a game server's own config files.
//!
//! Merges only ever add or overwrite the declared keys; every other section,
//! key, comment and line in the file is left as it was.

use std::fs;
use std::path::Path;

use serde_json::{Map, Value};

use super::types::{ConfigEntry, ConfigFormat, GameServerInstance};
use crate::error::{AgentError, Result};

/// Apply every resource's `ConfigSet` under `install_dir`. Returns the number of files rewritten.
pub fn enforce_config_files(install_dir: &Path, instance: &GameServerInstance) -> Result<usize> {
    let mut written = 0;
    for resource in &instance.resources {
        let Some(config) = &resource.config else {
            continue;
        };
        if config.entries.is_empty() {
            continue;
        }

        let path = GameServerInstance::resolve(install_dir, resource)?;
        let existing = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(AgentError::io(format!(
                    "Failed to read config file {:?}: {}",
                    path, e
                )))
            }
        };

        let merged = match config.format {
            ConfigFormat::Ini => merge_ini(&existing, &config.entries),
            ConfigFormat::Json => merge_json(&existing, &config.entries)
                .map_err(|e| AgentError::io(format!("Config file {:?}: {}", path, e)))?,
        };
        if merged == existing {
            continue;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, merged)
            .map_err(|e| AgentError::io(format!("Failed to write config file {:?}: {}", path, e)))?;
        log::debug!("Enforced {} key(s) in {:?}", config.entries.len(), path);
        written += 1;
    }
    Ok(written)
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with(';') || trimmed.starts_with('#') {
        return None;
    }
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

/// Merge entries into INI text. `category` is the section; empty means before any section.
pub fn merge_ini(existing: &str, entries: &[ConfigEntry]) -> String {
    let newline = if existing.contains("\r\n") { "\r\n" } else { "\n" };
    let mut lines: Vec<String> = existing.lines().map(str::to_string).collect();

    for entry in entries {
        let assignment = format!("{}={}", entry.key, entry.value);

        // Section span: [start, end) of the lines belonging to it, start after the header.
        let span = if entry.category.is_empty() {
            let end = lines
                .iter()
                .position(|l| section_name(l).is_some())
                .unwrap_or(lines.len());
            Some((0, end))
        } else {
            lines
                .iter()
                .position(|l| {
                    section_name(l).is_some_and(|s| s.eq_ignore_ascii_case(&entry.category))
                })
                .map(|header| {
                    let start = header + 1;
                    let end = lines[start..]
                        .iter()
                        .position(|l| section_name(l).is_some())
                        .map_or(lines.len(), |offset| start + offset);
                    (start, end)
                })
        };

        let Some((start, end)) = span else {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.push(format!("[{}]", entry.category));
            lines.push(assignment);
            continue;
        };

        let existing_key = (start..end).find(|&i| {
            line_key(&lines[i]).is_some_and(|k| k.eq_ignore_ascii_case(&entry.key))
        });
        match existing_key {
            Some(i) => lines[i] = assignment,
            None => {
                // After the last non-blank line of the section.
                let insert_at = (start..end)
                    .rev()
                    .find(|&i| !lines[i].trim().is_empty())
                    .map_or(start, |i| i + 1);
                lines.insert(insert_at, assignment);
            }
        }
    }

    let mut merged = lines.join(newline);
    if !merged.is_empty() {
        merged.push_str(newline);
    }
    merged
}

fn json_value_for(existing: Option<&Value>, raw: &str) -> Value {
    match existing {
        Some(Value::String(_)) => Value::String(raw.to_string()),
        _ => serde_json::from_str::<Value>(raw)
            .ok()
            .filter(|v| !v.is_object() && !v.is_array())
            .unwrap_or_else(|| Value::String(raw.to_string())),
    }
}

/// Merge entries into a JSON document. `category` is a dotted object path; empty means the root.
pub fn merge_json(existing: &str, entries: &[ConfigEntry]) -> std::result::Result<String, String> {
    let mut root = if existing.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str::<Value>(existing).map_err(|e| format!("invalid JSON: {e}"))?
    };

    for entry in entries {
        let mut node = &mut root;
        for segment in entry.category.split('.').filter(|s| !s.is_empty()) {
            node = node
                .as_object_mut()
                .ok_or_else(|| format!("'{}' is not an object", entry.category))?
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let map = node
            .as_object_mut()
            .ok_or_else(|| format!("'{}' is not an object", entry.category))?;
        let value = json_value_for(map.get(&entry.key), &entry.value);
        map.insert(entry.key.clone(), value);
    }

    let mut merged = serde_json::to_string_pretty(&root).map_err(|e| e.to_string())?;
    merged.push('\n');
    if merged.trim() == existing.trim() {
        return Ok(existing.to_string());
    }
    Ok(merged)
}
