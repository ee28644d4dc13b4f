//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::Error;

/// The permanent identity of a job.
/// Numbers are positive, dense and strictly increasing in allocation order,
/// and double as the job's storage key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(transparent)]
#[display("{_0}")]
pub struct JobNumber(u64);

impl JobNumber {
    /// The first number handed out in an empty store.
    pub const FIRST: JobNumber = JobNumber(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// The number that follows this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl From<u64> for JobNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<JobNumber> for u64 {
    fn from(number: JobNumber) -> Self {
        number.0
    }
}

impl std::str::FromStr for JobNumber {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .trim_start_matches('#')
            .parse()
            .map_err(|_| Error::InvalidInput(format!("invalid job number: {s:?}")))?;
        if value == 0 {
            return Err(Error::InvalidInput("job numbers start at 1".to_string()));
        }
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_number() {
        assert_eq!("42".parse::<JobNumber>().unwrap(), JobNumber::new(42));
        assert_eq!("#7".parse::<JobNumber>().unwrap(), JobNumber::new(7));
        assert_eq!(" 3 ".parse::<JobNumber>().unwrap(), JobNumber::new(3));
    }

    #[test]
    fn test_reject_invalid_job_number() {
        assert!("0".parse::<JobNumber>().is_err());
        assert!("-1".parse::<JobNumber>().is_err());
        assert!("abc".parse::<JobNumber>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_integer() {
        let json = serde_json::to_string(&JobNumber::new(12)).unwrap();
        assert_eq!(json, "12");
        assert_eq!(JobNumber::new(12).next(), JobNumber::new(13));
    }
}
