//! Parsers for the output of tools run inside a container.
//!
//! Each parser takes raw stdout and returns a typed value or a `ParseError`
//! naming what was wrong; raw text never travels further than this module.

use capsule_schema::ContentHash;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty output from {tool}")]
    Empty { tool: &'static str },
    #[error("invalid directory entry '{0}'")]
    InvalidEntry(String),
    #[error("malformed digest line '{0}'")]
    MalformedDigest(String),
    #[error("malformed commit hash '{0}'")]
    MalformedCommit(String),
    #[error("expected a single line from {tool}, got {lines}")]
    MultipleLines { tool: &'static str, lines: usize },
    #[error("unrecognized version string '{0}'")]
    MalformedVersion(String),
}

/// `pip freeze` output: one specifier per line, in the order reported.
///
/// Blank lines and `#` comment lines (pip's warnings about editable
/// installs) are dropped; every other line is kept verbatim after trimming.
pub fn parse_freeze(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect()
}

/// A one-name-per-line directory listing, sorted.
///
/// Entries must be bare names: a path separator, `.` or `..` is rejected.
pub fn parse_listing(stdout: &str) -> Result<Vec<String>, ParseError> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let entry = line.trim_end_matches('\r');
        if entry.trim().is_empty() {
            continue;
        }
        if entry.contains('/') || entry == "." || entry == ".." {
            return Err(ParseError::InvalidEntry(entry.to_owned()));
        }
        entries.push(entry.to_owned());
    }
    entries.sort();
    entries.dedup();
    Ok(entries)
}

/// First line of `sha256sum <file>`: `<64 hex>  <path>`.
pub fn parse_sha256sum(stdout: &str) -> Result<ContentHash, ParseError> {
    let line = stdout
        .lines()
        .find(|l| !l.trim().is_empty())
        .ok_or(ParseError::Empty { tool: "sha256sum" })?;
    let hex = line
        .split_whitespace()
        .next()
        .ok_or_else(|| ParseError::MalformedDigest(line.to_owned()))?;
    // GNU coreutils prefixes the digest with '\' when the file name needs escaping.
    let hex = hex.strip_prefix('\\').unwrap_or(hex);
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::MalformedDigest(line.to_owned()));
    }
    Ok(ContentHash::sha256(&hex.to_ascii_lowercase()))
}

/// `git rev-parse HEAD`: a full SHA-1 (40) or SHA-256 (64) object name.
pub fn parse_commit(stdout: &str) -> Result<String, ParseError> {
    let value = single_line(stdout, "git rev-parse")?;
    let valid_len = value.len() == 40 || value.len() == 64;
    if !valid_len || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ParseError::MalformedCommit(value.to_owned()));
    }
    Ok(value.to_ascii_lowercase())
}

/// `git config --get remote.origin.url`.
pub fn parse_remote_url(stdout: &str) -> Result<String, ParseError> {
    Ok(single_line(stdout, "git config")?.to_owned())
}

/// `python --version`, e.g. `Python 3.11.4` → `3.11.4`.
pub fn parse_python_version(stdout: &str) -> Result<String, ParseError> {
    let line = single_line(stdout, "python --version")?;
    let version = line
        .strip_prefix("Python ")
        .ok_or_else(|| ParseError::MalformedVersion(line.to_owned()))?;
    validate_version(version)
}

/// A bare dotted version such as the `CUDA_VERSION` environment variable.
pub fn parse_dotted_version(stdout: &str) -> Result<String, ParseError> {
    validate_version(single_line(stdout, "printenv")?)
}

fn validate_version(v: &str) -> Result<String, ParseError> {
    let ok = v.split('.').all(|part| {
        !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'+')
    }) && v.starts_with(|c: char| c.is_ascii_digit());
    if ok {
        Ok(v.to_owned())
    } else {
        Err(ParseError::MalformedVersion(v.to_owned()))
    }
}

fn single_line<'a>(stdout: &'a str, tool: &'static str) -> Result<&'a str, ParseError> {
    let lines: Vec<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    match lines.as_slice() {
        [] => Err(ParseError::Empty { tool }),
        [one] => Ok(*one),
        more => Err(ParseError::MultipleLines {
            tool,
            lines: more.len(),
        }),
    }
}
