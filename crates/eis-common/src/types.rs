//! Shared domain types

use serde::{Deserialize, Serialize};

/// An employee record as read from the input resource
///
/// `id` is assigned by the storage layer on commit and is `None` for
/// records that have not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Employee {
    pub id: Option<i32>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub contact: String,
    pub country: String,
    pub dob: String,
}

impl Employee {
    /// Number of positional fields in a data line
    pub const FIELD_COUNT: usize = 6;

    /// Build an employee from positionally-assigned tokens
    ///
    /// Tokenization is non-strict: lines with fewer tokens than
    /// [`Self::FIELD_COUNT`] leave the missing trailing fields empty.
    pub fn from_tokens(tokens: &[&str]) -> Self {
        let field = |i: usize| tokens.get(i).map(|t| t.to_string()).unwrap_or_default();

        Self {
            id: None,
            first_name: field(0),
            last_name: field(1),
            email: field(2),
            contact: field(3),
            country: field(4),
            dob: field(5),
        }
    }
}
