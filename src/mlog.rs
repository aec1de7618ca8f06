use std::fmt;

use anyhow::{anyhow, bail, Result};

/// Right-hand side of a `set` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(u64),
    /// Rendered between quotes exactly as held. Callers escape free text
    /// with [`escape_value`] before wrapping it here.
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Set { key: String, value: Value },
    Stop,
}

impl Statement {
    pub fn set_int(key: impl Into<String>, value: u64) -> Self {
        Self::Set {
            key: key.into(),
            value: Value::Int(value),
        }
    }

    pub fn set_str(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Set {
            key: key.into(),
            value: Value::Str(value.into()),
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Set { key, .. } => Some(key),
            Self::Stop => None,
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set {
                key,
                value: Value::Int(value),
            } => write!(f, "set {key} {value}"),
            Self::Set {
                key,
                value: Value::Str(value),
            } => write!(f, "set {key} \"{value}\""),
            Self::Stop => f.write_str("stop"),
        }
    }
}

/// Escapes backslash and double quote for use inside a quoted value.
pub fn escape_value(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn unescape_value(text: &str) -> Result<String> {
    let mut output = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            output.push(ch);
            continue;
        }
        match chars.next() {
            Some(next @ ('\\' | '"')) => output.push(next),
            Some(other) => bail!("unknown escape sequence '\\{other}'"),
            None => bail!("dangling backslash at end of value"),
        }
    }
    Ok(output)
}

/// Parses one line of block output back into a [`Statement`].
/// String values are returned still escaped.
pub fn parse_statement(line: &str) -> Result<Statement> {
    if line == "stop" {
        return Ok(Statement::Stop);
    }
    let rest = line
        .strip_prefix("set ")
        .ok_or_else(|| anyhow!("expected 'set' or 'stop', got '{line}'"))?;
    let (key, raw_value) = rest
        .split_once(' ')
        .ok_or_else(|| anyhow!("missing value in '{line}'"))?;
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!("invalid identifier '{key}'");
    }

    if let Some(quoted) = raw_value.strip_prefix('"') {
        let inner = quoted
            .strip_suffix('"')
            .ok_or_else(|| anyhow!("unterminated string for '{key}'"))?;
        validate_quoted(inner).map_err(|error| anyhow!("value of '{key}': {error}"))?;
        return Ok(Statement::set_str(key, inner));
    }

    let value = raw_value
        .parse::<u64>()
        .map_err(|_| anyhow!("value of '{key}' is neither integer nor string: '{raw_value}'"))?;
    Ok(Statement::set_int(key, value))
}

fn validate_quoted(inner: &str) -> Result<()> {
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => bail!("unescaped quote"),
            '\\' => match chars.next() {
                Some('\\' | '"') => {}
                _ => bail!("invalid escape"),
            },
            _ => {}
        }
    }
    Ok(())
}
