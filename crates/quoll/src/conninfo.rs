//! Connection-string model and parser.
//!
//! A connection string is a space-delimited sequence of `key=value` tokens,
//! libpq-style. Values containing spaces may be single-quoted, with `\'` and
//! `\\` escapes. Unknown keys are rejected outright so that typos surface at
//! construction rather than as silently ignored settings.

use std::time::Duration;

use crate::{Error, Result};

enum_mode! {
    /// TLS negotiation policy requested from the wire driver.
    pub SslMode {
        Disable => "disable",
        Allow => "allow",
        Prefer => "prefer",
        Require => "require",
        VerifyCa => "verify-ca",
        VerifyFull => "verify-full",
    }
    default Prefer
}

/// Parsed connection parameters handed to the [`Connector`] on every open.
///
/// [`Connector`]: crate::wire::Connector
#[derive(Clone, Debug)]
pub struct ConnInfo {
    host: String,
    user: String,
    dbname: String,
    password: Option<String>,
    port: Option<u16>,
    sslmode: Option<SslMode>,
    connect_timeout: Option<Duration>,
    persistent: Option<bool>,
}

impl ConnInfo {
    /// Parse a space-delimited `key=value` connection string.
    ///
    /// `host`, `user` and `dbname` are required and must be non-empty.
    pub fn parse(conninfo: &str) -> Result<ConnInfo> {
        let mut host = None;
        let mut user = None;
        let mut dbname = None;
        let mut password = None;
        let mut port = None;
        let mut sslmode = None;
        let mut connect_timeout = None;
        let mut persistent = None;

        for (key, value) in tokenize(conninfo)? {
            match key.as_str() {
                "host" => host = Some(value),
                "user" => user = Some(value),
                "dbname" => dbname = Some(value),
                "password" => password = Some(value),
                "port" => {
                    let parsed: u16 = value
                        .parse()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| config_err(format!("invalid port: {value:?}")))?;
                    port = Some(parsed);
                }
                "sslmode" => {
                    let mode = SslMode::parse(&value)
                        .ok_or_else(|| config_err(format!("invalid sslmode: {value:?}")))?;
                    sslmode = Some(mode);
                }
                "connect_timeout" => {
                    let secs: u64 = value
                        .parse()
                        .ok()
                        .filter(|s| *s > 0)
                        .ok_or_else(|| config_err(format!("invalid connect_timeout: {value:?}")))?;
                    connect_timeout = Some(Duration::from_secs(secs));
                }
                "persistent" => {
                    let flag = match value.as_str() {
                        "1" | "on" | "true" | "yes" => true,
                        "0" | "off" | "false" | "no" => false,
                        _ => return Err(config_err(format!("invalid persistent flag: {value:?}"))),
                    };
                    persistent = Some(flag);
                }
                other => {
                    return Err(config_err(format!(
                        "unrecognized connection parameter: {other:?}"
                    )));
                }
            }
        }

        Ok(ConnInfo {
            host: required("host", host)?,
            user: required("user", user)?,
            dbname: required("dbname", dbname)?,
            password,
            port,
            sslmode,
            connect_timeout,
            persistent,
        })
    }

    /// Server hostname.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Username.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Database name.
    pub fn dbname(&self) -> &str {
        &self.dbname
    }

    /// Password, if one was given. May be the empty string.
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// TCP port, if one was given.
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Requested TLS policy, if one was given.
    pub fn sslmode(&self) -> Option<SslMode> {
        self.sslmode
    }

    /// Connection-open timeout, if one was given.
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Whether the driver should reuse server processes across client
    /// recreation, if requested.
    pub fn persistent(&self) -> Option<bool> {
        self.persistent
    }
}

fn config_err(message: String) -> Error {
    Error::Configuration(message)
}

fn required(key: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        Some(_) => Err(config_err(format!(
            "connection parameter {key:?} must not be empty"
        ))),
        None => Err(config_err(format!(
            "missing required connection parameter {key:?}"
        ))),
    }
}

/// Split a conninfo string into `(key, value)` pairs.
fn tokenize(input: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek().is_none() {
            return Ok(pairs);
        }

        let mut key = String::new();
        loop {
            match chars.next() {
                Some('=') => break,
                Some(c) if c.is_whitespace() => {
                    return Err(config_err(format!("expected '=' after {key:?}")));
                }
                Some(c) => key.push(c),
                None => return Err(config_err(format!("expected '=' after {key:?}"))),
            }
        }
        if key.is_empty() {
            return Err(config_err("empty connection parameter name".into()));
        }

        let mut value = String::new();
        if matches!(chars.peek(), Some('\'')) {
            chars.next();
            loop {
                match chars.next() {
                    Some('\\') => match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => {
                            return Err(config_err(format!("unterminated quoted value for {key:?}")));
                        }
                    },
                    Some('\'') => break,
                    Some(c) => value.push(c),
                    None => {
                        return Err(config_err(format!("unterminated quoted value for {key:?}")));
                    }
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        pairs.push((key, value));
    }
}
