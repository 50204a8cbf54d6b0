// SPDX-License-Identifier: MIT

//! Simple INI file parser with zero dependencies
//! Supports sections, key-value pairs, comments and size values

use super::ConfigError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct IniConfig {
    sections: HashMap<String, HashMap<String, String>>,
    global: HashMap<String, String>,
}

impl IniConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from file
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse INI content from string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::new();
        let mut current_section = String::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            let line_number = line_num + 1;

            // Skip empty lines and comments
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(section) = line.strip_prefix('[') {
                let Some(section) = section.strip_suffix(']') else {
                    // Malformed section header - ignore it gracefully
                    continue;
                };
                current_section = section.trim().to_string();
                if current_section.is_empty() {
                    return Err(ConfigError::parse(line_number, "empty section name"));
                }
                config.sections.entry(current_section.clone()).or_default();
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::parse(
                    line_number,
                    format!("invalid syntax: {line}"),
                ));
            };

            let key = key.trim();
            if key.is_empty() {
                return Err(ConfigError::parse(line_number, format!("empty key: {line}")));
            }

            // Inline comments run to the end of the line
            let value = value
                .split(['#', ';'])
                .next()
                .unwrap_or_default()
                .trim()
                .to_string();

            let target = if current_section.is_empty() {
                &mut config.global
            } else {
                config
                    .sections
                    .entry(current_section.clone())
                    .or_default()
            };
            target.insert(key.to_string(), value);
        }

        Ok(config)
    }

    /// Get string value
    pub fn get_string(&self, section: &str, key: &str) -> Option<String> {
        if section.is_empty() {
            self.global.get(key).cloned()
        } else {
            self.sections.get(section)?.get(key).cloned()
        }
    }

    /// Get comma-separated list
    pub fn get_list(&self, section: &str, key: &str) -> Vec<String> {
        self.get_string(section, key)
            .map(|s| split_list(&s))
            .unwrap_or_default()
    }
}

/// Split a comma-separated list, dropping empty items
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse sizes like "10GB", "500MB", "1.5KB" or plain byte counts
pub fn parse_file_size(value: &str) -> Option<u64> {
    let value = value.trim().to_uppercase();

    if let Ok(num) = value.parse::<u64>() {
        return Some(num);
    }

    let (num_part, multiplier) = if let Some(num) = value.strip_suffix("TB") {
        (num, 1024u64 * 1024 * 1024 * 1024)
    } else if let Some(num) = value.strip_suffix("GB") {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = value.strip_suffix("MB") {
        (num, 1024 * 1024)
    } else if let Some(num) = value.strip_suffix("KB") {
        (num, 1024)
    } else if let Some(num) = value.strip_suffix('B') {
        (num, 1)
    } else {
        return None;
    };

    let num_str = num_part.trim();

    if let Ok(num) = num_str.parse::<u64>() {
        return num.checked_mul(multiplier);
    }

    // Decimal values like "1.5"
    match num_str.parse::<f64>() {
        Ok(num) if num.is_finite() && num >= 0.0 => Some((num * multiplier as f64) as u64),
        _ => None,
    }
}
