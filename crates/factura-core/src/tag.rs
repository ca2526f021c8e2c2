//! # Store Tags
//!
//! Short uppercase code embedded in every invoice number.
//!
//! ## Derivation Rule
//! ```text
//! "Boutique Centre-Ville"
//!      │ uppercase
//!      ▼
//! "BOUTIQUE CENTRE-VILLE"
//!      │ strip everything that is not A-Z / 0-9 (whitespace, '-', accents...)
//!      ▼
//! "BOUTIQUECENTREVILLE"
//!      │ keep the first six characters
//!      ▼
//! "BOUTIQ"
//! ```
//!
//! A missing store, or a name with no usable character, yields `BTQ001`.
//!
//! The rule is lossy: two stores can share a tag. Sequence counters are
//! scoped by store id, never by tag.

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::NumberFormatError;
use crate::types::Store;
use crate::{MAX_TAG_LEN, SENTINEL_TAG};

/// A validated 1..=6 character `[A-Z0-9]` store tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(try_from = "String", into = "String")]
#[ts(export, type = "string")]
pub struct StoreTag(String);

impl StoreTag {
    /// Tag for invoices without a store.
    pub fn sentinel() -> Self {
        StoreTag(SENTINEL_TAG.to_string())
    }

    /// Derives the tag for a store, or the sentinel when there is none.
    pub fn for_store(store: Option<&Store>) -> Self {
        Self::for_name(store.map(|s| s.name.as_str()))
    }

    /// Derives the tag from an optional store display name.
    pub fn for_name(name: Option<&str>) -> Self {
        name.map(Self::from_name).unwrap_or_else(Self::sentinel)
    }

    /// Derives the tag from a store display name.
    pub fn from_name(name: &str) -> Self {
        let tag: String = name
            .chars()
            .flat_map(char::to_uppercase)
            .filter(char::is_ascii_alphanumeric)
            .take(MAX_TAG_LEN)
            .collect();

        if tag.is_empty() {
            Self::sentinel()
        } else {
            StoreTag(tag)
        }
    }

    /// Parses a tag read back from an invoice number.
    pub fn parse(s: &str) -> Result<Self, NumberFormatError> {
        let valid = !s.is_empty()
            && s.len() <= MAX_TAG_LEN
            && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());

        if valid {
            Ok(StoreTag(s.to_string()))
        } else {
            Err(NumberFormatError::Tag(s.to_string()))
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.0 == SENTINEL_TAG
    }
}

impl fmt::Display for StoreTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StoreTag {
    type Error = NumberFormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StoreTag::parse(&value)
    }
}

impl From<StoreTag> for String {
    fn from(tag: StoreTag) -> Self {
        tag.0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
