use std::fmt;
use std::str::FromStr;

use crate::error::CliError;

/// Inclusive byte range given on the command line as `start-end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn as_tuple(&self) -> (u64, u64) {
        (self.start, self.end)
    }
}

impl FromStr for ByteRange {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CliError::InvalidRange(s.to_string());
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start: u64 = start.trim().parse().map_err(|_| invalid())?;
        let end: u64 = end.trim().parse().map_err(|_| invalid())?;
        if end < start {
            return Err(invalid());
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
