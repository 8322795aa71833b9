use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::store::StoreError;

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Application store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AnalyticsError {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AnalyticsError::StoreUnavailable(_))
    }
}

impl From<StoreError> for AnalyticsError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            AnalyticsError::StoreUnavailable(err)
        } else {
            AnalyticsError::Unexpected(err.to_string())
        }
    }
}

/// Identity of the user whose applications are being aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new(id: Uuid) -> AnalyticsResult<Self> {
        if id.is_nil() {
            return Err(AnalyticsError::Validation("owner id must not be nil".to_string()));
        }
        Ok(Self(id))
    }

    pub fn parse(raw: &str) -> AnalyticsResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AnalyticsError::Validation("owner id is missing".to_string()));
        }
        let id = Uuid::parse_str(trimmed).map_err(|err| {
            AnalyticsError::Validation(format!("owner id '{trimmed}' is malformed: {err}"))
        })?;
        Self::new(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl FromStr for OwnerId {
    type Err = AnalyticsError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::parse(raw)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_owner() {
        let raw = "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2";
        let owner = OwnerId::parse(raw).unwrap();
        assert_eq!(owner.to_string(), raw);
    }

    #[test]
    fn rejects_missing_malformed_and_nil_owners() {
        for raw in ["", "   ", "not-a-uuid", "00000000-0000-0000-0000-000000000000"] {
            let err = OwnerId::parse(raw).unwrap_err();
            assert!(matches!(err, AnalyticsError::Validation(_)), "{raw:?} gave {err:?}");
            assert!(!err.is_transient());
        }
    }

    #[test]
    fn transient_store_errors_stay_transient() {
        let err = AnalyticsError::from(StoreError::Unavailable("pool timed out".to_string()));
        assert!(err.is_transient());
        assert!(matches!(err, AnalyticsError::StoreUnavailable(_)));

        let err = AnalyticsError::from(StoreError::Query("bad column".to_string()));
        assert!(!err.is_transient());
        assert!(matches!(err, AnalyticsError::Unexpected(_)));
    }
}
