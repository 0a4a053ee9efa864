use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// Connection descriptor derived from a `scheme://user@host[:port]/path` repository URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    raw: String,
    pub scheme: String,
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
}

impl RepoUrl {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let raw = value.trim();
        let invalid = |why: &str| {
            ConfigError::Invalid(format!(
                "repository URL {:?} {}; expected scheme://user@host[:port]/path",
                raw, why
            ))
        };
        let (scheme, rest) = raw.split_once("://").ok_or_else(|| invalid("has no scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(invalid("has an invalid scheme"));
        }
        let slash = rest.find('/').ok_or_else(|| invalid("has no path"))?;
        let (authority, path) = rest.split_at(slash);
        if path.len() <= 1 {
            return Err(invalid("has an empty path"));
        }
        let (user, hostport) = authority
            .rsplit_once('@')
            .ok_or_else(|| invalid("has no user"))?;
        if user.is_empty() {
            return Err(invalid("has an empty user"));
        }
        let (host, port) = split_host_port(hostport).map_err(|why| invalid(&why))?;
        if host.is_empty() {
            return Err(invalid("has an empty host"));
        }
        Ok(RepoUrl {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            user: user.to_string(),
            host,
            port,
            path: path.to_string(),
        })
    }

    /// Host token as ssh writes it into known_hosts: `host`, or `[host]:port`.
    pub fn known_hosts_token(&self) -> String {
        match self.port {
            Some(port) => format!("[{}]:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// `user@host`, the ssh destination.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

fn split_host_port(hostport: &str) -> Result<(String, Option<u16>), String> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| "has an unterminated [ in the host".to_string())?;
        return match after {
            "" => Ok((host.to_string(), None)),
            _ => {
                let port = after
                    .strip_prefix(':')
                    .ok_or_else(|| "has garbage after the host".to_string())?;
                Ok((host.to_string(), Some(parse_port(port)?)))
            }
        };
    }
    match hostport.split_once(':') {
        Some((host, port)) => Ok((host.to_string(), Some(parse_port(port)?))),
        None => Ok((hostport.to_string(), None)),
    }
}

fn parse_port(value: &str) -> Result<u16, String> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("has an invalid port {:?}", value)),
    }
}

impl FromStr for RepoUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RepoUrl::parse(s)
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
