//! Utility functions for ringkv

use crate::common::{Error, Result};
use std::path::Path;

/// Name of the node started with bootstrap id `id`
pub fn node_name(prefix: &str, id: u16) -> String {
    format!("{}{}", prefix, id)
}

/// Listening port of the node started with bootstrap id `id`
pub fn node_port(base_port: u16, id: u16) -> Result<u16> {
    base_port.checked_add(id).ok_or_else(|| {
        Error::InvalidConfig(format!("port {} + {} overflows", base_port, id))
    })
}

/// One line of the bootstrap address list: `<host> <id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapEntry {
    pub host: String,
    pub id: u16,
}

impl BootstrapEntry {
    pub fn parse(line: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidBootstrapEntry {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = line.split_whitespace();
        let host = fields.next().ok_or_else(|| invalid("missing host"))?;
        let id = fields.next().ok_or_else(|| invalid("missing id"))?;
        if fields.next().is_some() {
            return Err(invalid("trailing fields"));
        }
        let id = id.parse().map_err(|_| invalid("id is not a small integer"))?;

        Ok(Self {
            host: host.to_string(),
            id,
        })
    }

    pub fn name(&self, prefix: &str) -> String {
        node_name(prefix, self.id)
    }

    /// `host:port` under the shared naming scheme
    pub fn address(&self, base_port: u16) -> Result<String> {
        Ok(format!("{}:{}", self.host, node_port(base_port, self.id)?))
    }
}

/// Parse a whole address list. Blank lines and `#` comments are skipped.
pub fn parse_address_list(contents: &str) -> Result<Vec<BootstrapEntry>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(BootstrapEntry::parse)
        .collect()
}

/// Read the bootstrap address list once at startup
pub async fn load_address_list(path: impl AsRef<Path>) -> Result<Vec<BootstrapEntry>> {
    let contents = tokio::fs::read_to_string(path.as_ref()).await?;
    parse_address_list(&contents)
}

/// Parse duration string (e.g., "500ms", "2s", "1m")
pub fn parse_duration(s: &str) -> Result<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::InvalidConfig("empty duration".into()));
    }

    let (num_str, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, "ms")
    } else {
        let split = s.len() - s.chars().last().map_or(0, char::len_utf8);
        (&s[..split], &s[split..])
    };

    let num: u64 = num_str
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid duration: {}", s)))?;

    let duration = match unit {
        "ms" => std::time::Duration::from_millis(num),
        "s" => std::time::Duration::from_secs(num),
        "m" => std::time::Duration::from_secs(num * 60),
        _ => {
            return Err(Error::InvalidConfig(format!(
                "unknown duration unit: {}",
                unit
            )))
        }
    };

    Ok(duration)
}
