use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProxyScheme {
    Http,
    Socks4,
    Socks5,
}

impl ProxyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks5 => "socks5",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyParseError {
    #[error("empty proxy entry")]
    Empty,
    #[error("unsupported proxy scheme: {0}")]
    UnsupportedScheme(String),
    #[error("proxy without port: {0}")]
    MissingPort(String),
    #[error("invalid proxy: {0}")]
    Invalid(String),
}

/// One proxy endpoint. `address` is `[user:pass@]host:port` with a lowercased host.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEntry {
    pub address: String,
    pub scheme: ProxyScheme,
}

impl ProxyEntry {
    /// Dedup key: `scheme://address`.
    pub fn normalized(&self) -> String {
        self.to_url()
    }

    pub fn to_url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.address)
    }

    /// Persisted form. Plain HTTP proxies are stored as bare `host:port`.
    pub fn to_line(&self) -> String {
        match self.scheme {
            ProxyScheme::Http => self.address.clone(),
            _ => self.to_url(),
        }
    }
}

impl FromStr for ProxyEntry {
    type Err = ProxyParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim().trim_end_matches('/');
        if raw.is_empty() {
            return Err(ProxyParseError::Empty);
        }

        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{}", raw)
        };

        let parsed =
            url::Url::parse(&with_scheme).map_err(|_| ProxyParseError::Invalid(raw.to_string()))?;

        let scheme = match parsed.scheme() {
            "http" | "https" => ProxyScheme::Http,
            "socks4" | "socks4a" => ProxyScheme::Socks4,
            "socks5" | "socks5h" => ProxyScheme::Socks5,
            other => return Err(ProxyParseError::UnsupportedScheme(other.to_string())),
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ProxyParseError::Invalid(raw.to_string()))?
            .to_lowercase();
        let port = if has_explicit_port(&with_scheme) {
            parsed.port_or_known_default()
        } else {
            None
        }
        .ok_or_else(|| ProxyParseError::MissingPort(raw.to_string()))?;

        let credentials = if parsed.username().is_empty() {
            String::new()
        } else {
            match parsed.password() {
                Some(pass) => format!("{}:{}@", parsed.username(), pass),
                None => format!("{}@", parsed.username()),
            }
        };

        Ok(ProxyEntry {
            address: format!("{}{}:{}", credentials, host, port),
            scheme,
        })
    }
}

impl fmt::Display for ProxyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line())
    }
}

// `Url::port` hides scheme-default ports, so `http://h:80` needs a textual check.
fn has_explicit_port(url: &str) -> bool {
    let authority = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or(authority);
    host_port
        .rsplit_once(':')
        .map(|(_, port)| !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

/// Parses a newline separated proxy list, skipping unparsable lines and duplicates
/// while keeping first-seen order.
pub fn parse_proxy_list(raw: &str) -> Vec<ProxyEntry> {
    let mut seen = std::collections::HashSet::new();
    raw.lines()
        .filter_map(|line| line.parse::<ProxyEntry>().ok())
        .filter(|entry| seen.insert(entry.normalized()))
        .collect()
}

pub fn format_proxy_list(entries: &[ProxyEntry]) -> String {
    entries
        .iter()
        .map(|e| e.to_line())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_defaults_to_http() {
        let entry: ProxyEntry = "217.217.254.94:8080".parse().unwrap();
        assert_eq!(entry.scheme, ProxyScheme::Http);
        assert_eq!(entry.to_url(), "http://217.217.254.94:8080");
        assert_eq!(entry.to_line(), "217.217.254.94:8080");
    }

    #[test]
    fn socks_entries_keep_their_scheme() {
        let entry: ProxyEntry = "SOCKS5://Proxy.Example.com:1080/".parse().unwrap();
        assert_eq!(entry.scheme, ProxyScheme::Socks5);
        assert_eq!(entry.to_line(), "socks5://proxy.example.com:1080");
    }

    #[test]
    fn credentials_survive_parsing() {
        let entry: ProxyEntry = "socks4://user:pw@10.0.0.1:9050".parse().unwrap();
        assert_eq!(entry.address, "user:pw@10.0.0.1:9050");
    }

    #[test]
    fn rejects_missing_port_and_unknown_scheme() {
        assert!(matches!(
            "10.0.0.1".parse::<ProxyEntry>(),
            Err(ProxyParseError::MissingPort(_))
        ));
        assert!(matches!(
            "ftp://10.0.0.1:21".parse::<ProxyEntry>(),
            Err(ProxyParseError::UnsupportedScheme(_))
        ));
        assert_eq!("  ".parse::<ProxyEntry>(), Err(ProxyParseError::Empty));
    }

    #[test]
    fn parse_errors_describe_the_input() {
        let err = "10.0.0.1".parse::<ProxyEntry>().unwrap_err();
        assert_eq!(err.to_string(), "proxy without port: 10.0.0.1");
        let boxed: Box<dyn std::error::Error> = Box::new(ProxyParseError::Empty);
        assert_eq!(boxed.to_string(), "empty proxy entry");
    }

    #[test]
    fn list_parsing_dedups_by_normalized_form() {
        let raw = "1.2.3.4:80\nhttp://1.2.3.4:80\n\nsocks5://5.6.7.8:1080\ngarbage";
        let list = parse_proxy_list(raw);
        assert_eq!(list.len(), 2);
        assert_eq!(format_proxy_list(&list), "1.2.3.4:80\nsocks5://5.6.7.8:1080");
    }
}
