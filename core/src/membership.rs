//! Sequential, human-facing membership identifiers.
//!
//! An identifier is the issuing period (`YYYYMM`) followed by the sequence
//! number within that period, zero-padded to three digits: the first member
//! issued in January 2025 is `202501001`.

use crate::error::ValidationError;
use crate::types::UserId;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Calendar-month bucket scoping sequence uniqueness, e.g. `"202501"`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeriodKey(String);

impl PeriodKey {
    /// Period containing `at` (UTC calendar)
    #[must_use]
    pub fn for_instant(at: DateTime<Utc>) -> Self {
        Self(format!("{:04}{:02}", at.year(), at.month()))
    }

    /// Parse a stored period key.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownValue`] unless the text is six digits
    /// with a month between 01 and 12.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::UnknownValue {
            field: "period",
            value: s.to_string(),
        };
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let month: u32 = s[4..].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }

    /// The key text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier assigned at most once per user, on first successful payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipIdentity {
    /// Owner
    pub user_id: UserId,
    /// Issuing period
    pub period: PeriodKey,
    /// Sequence within the period, starting at 1
    pub sequence: u32,
    /// Rendered identifier
    pub identifier: String,
    /// When it was issued
    pub issued_at: DateTime<Utc>,
}

impl MembershipIdentity {
    /// Minimum digits of the sequence part
    pub const SEQUENCE_WIDTH: usize = 3;

    /// Builds an identity, rendering its identifier.
    #[must_use]
    pub fn new(
        user_id: UserId,
        period: PeriodKey,
        sequence: u32,
        issued_at: DateTime<Utc>,
    ) -> Self {
        let identifier = Self::render(&period, sequence);
        Self {
            user_id,
            period,
            sequence,
            identifier,
            issued_at,
        }
    }

    /// `period + zero-pad(sequence, 3)`. Sequences past 999 widen instead of wrapping.
    #[must_use]
    pub fn render(period: &PeriodKey, sequence: u32) -> String {
        format!(
            "{period}{sequence:0width$}",
            width = Self::SEQUENCE_WIDTH
        )
    }
}

impl fmt::Display for MembershipIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identifier)
    }
}
