pub mod directory;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors from schema identity derivation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaNameError {
    #[error("Account key must not be empty")]
    EmptyAccountKey,

    #[error("Invalid account name: {0:?} contains no usable characters")]
    InvalidAccountName(String),

    #[error("Invalid schema identifier: {0:?}")]
    InvalidSchemaId(String),
}

/// Canonical identifier of one tenant's physical schema.
///
/// Only ever constructed through [`derive_schema_name`] or [`TenantSchemaId::parse`],
/// so the inner string is guaranteed to be lowercase `[a-z0-9_]+` and safe to
/// splice into a quoted SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantSchemaId(String);

impl TenantSchemaId {
    /// Validate an identifier that already exists (persisted on an account
    /// record, or discovered in the database catalog).
    pub fn parse(raw: &str) -> Result<Self, SchemaNameError> {
        if raw.is_empty()
            || !raw
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(SchemaNameError::InvalidSchemaId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form for use in DDL/DML against this tenant's schema.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for TenantSchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the canonical schema identifier for a tenant-owner account.
///
/// `normalize(display_name) + "_" + lower(account_key)`, where normalize
/// strips every character outside `[A-Za-z0-9]` and lower-cases the rest.
/// Pure and deterministic; used at provisioning time only. Once assigned the
/// identifier is persisted on the account record and never re-derived, so a
/// later display-name change cannot orphan the schema silently.
pub fn derive_schema_name(
    display_name: &str,
    account_key: &str,
) -> Result<TenantSchemaId, SchemaNameError> {
    if account_key.is_empty() {
        return Err(SchemaNameError::EmptyAccountKey);
    }

    let prefix: String = display_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if prefix.is_empty() {
        return Err(SchemaNameError::InvalidAccountName(display_name.to_string()));
    }

    let key = account_key.to_lowercase();
    TenantSchemaId::parse(&format!("{}_{}", prefix, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_schema_name("Acme Dairy", "AC123").unwrap();
        let b = derive_schema_name("Acme Dairy", "AC123").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "acmedairy_ac123");
    }

    #[test]
    fn punctuation_and_case_do_not_matter() {
        let a = derive_schema_name("Acme Dairy", "AC123").unwrap();
        let b = derive_schema_name("Acme-Dairy!!", "ac123").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unicode_is_filtered_to_ascii_alnum() {
        let id = derive_schema_name("Gokul Döödh 42", "K9").unwrap();
        assert_eq!(id.as_str(), "gokulddh42_k9");
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(
            derive_schema_name("Acme", ""),
            Err(SchemaNameError::EmptyAccountKey)
        );
    }

    #[test]
    fn name_with_no_usable_characters_is_rejected() {
        assert!(matches!(
            derive_schema_name("!!##--", "AC1"),
            Err(SchemaNameError::InvalidAccountName(_))
        ));
    }

    #[test]
    fn parse_rejects_unsafe_identifiers() {
        assert!(TenantSchemaId::parse("acme_ac123").is_ok());
        assert!(TenantSchemaId::parse("Acme_AC123").is_err());
        assert!(TenantSchemaId::parse("acme; drop schema public").is_err());
        assert!(TenantSchemaId::parse("").is_err());
    }
}
