//! Location parsing for CLI commands
//!
//! Accepts `FILE:LINE[:COL]` with 1-based numbers. The path itself may
//! contain colons (Windows drives, odd file names); only trailing numeric
//! segments are taken as the position.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLocation {
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
}

impl ParsedLocation {
    /// Parse and resolve the file against the working directory
    pub fn parse_absolute(input: &str) -> Result<Self> {
        Self::parse(input)?.to_absolute()
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            bail!("Location cannot be empty");
        }

        let Some((head, last)) = input.rsplit_once(':') else {
            bail!("Invalid location '{}'. Expected FILE:LINE[:COL]\nExample: src/Main.hs:10:5", input);
        };

        let (file, line, column) = match head.rsplit_once(':') {
            Some((file, mid)) if is_number_like(mid) => (file, mid, last),
            _ => (head, last, "1"),
        };
        if file.is_empty() {
            bail!("Location '{}' has no file", input);
        }

        Ok(Self {
            file: PathBuf::from(file),
            line: parse_number(line, "line")?,
            column: parse_number(column, "column")?,
        })
    }

    pub fn to_absolute(&self) -> Result<Self> {
        let file = if self.file.is_absolute() {
            self.file.clone()
        } else {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(&self.file)
        };
        if !file.is_file() {
            bail!("File not found: {}", file.display());
        }
        Ok(Self {
            file,
            line: self.line,
            column: self.column,
        })
    }
}

impl std::fmt::Display for ParsedLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Parse a bare `LINE:COL` pair
pub fn parse_line_col(input: &str) -> Result<(u32, u32)> {
    let input = input.trim();
    let Some((line, column)) = input.split_once(':') else {
        bail!("Invalid position '{}'. Expected LINE:COL", input);
    };
    Ok((parse_number(line, "line")?, parse_number(column, "column")?))
}

fn is_number_like(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_number(s: &str, what: &str) -> Result<u32> {
    if s.starts_with('-') {
        bail!("Invalid {} '{}': negative values not allowed (1-indexed)", what, s);
    }
    let value: u32 = s
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {} '{}': must be a positive integer", what, s))?;
    if value == 0 {
        bail!("{} must be >= 1 (got 0)", capitalize(what));
    }
    Ok(value)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
