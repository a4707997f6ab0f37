//! Credential types and registration.

use serde::Serialize;

use crate::registry::Sealed;

/// Errors that can occur when accessing credentials.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialError {
    /// The requested credential was not rendered by the host.
    #[error("credential '{0}' not found")]
    NotFound(String),

    /// The rendered values do not match the credential definition.
    #[error("failed to deserialize credential: {0}")]
    DeserializationError(String),
}

/// Schema for a single field within a credential.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialFieldSchema {
    pub description: &'static str,
    pub required: bool,
    /// Secret fields are masked by hosts when displaying credentials.
    pub secret: bool,
}

/// Registry entry for a credential definition.
///
/// Only `define_credential!` can build one, because construction requires a
/// [`Sealed`] token that cannot be created outside this crate.
#[derive(Debug)]
pub struct CredentialEntry {
    /// Name the host renders the credential under (e.g. "microsoft").
    pub name: &'static str,
    pub description: &'static str,
    pub fields: &'static [(&'static str, CredentialFieldSchema)],
    #[doc(hidden)]
    pub __sealed: Sealed,
}

impl Serialize for CredentialEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::{SerializeMap, SerializeStruct};

        /// Serializes the field slice as a map without allocating.
        struct FieldsMap<'a>(&'a [(&'static str, CredentialFieldSchema)]);

        impl Serialize for FieldsMap<'_> {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (key, value) in self.0 {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
        }

        let mut state = serializer.serialize_struct("CredentialEntry", 3)?;
        state.serialize_field("name", self.name)?;
        state.serialize_field("description", self.description)?;
        state.serialize_field("fields", &FieldsMap(self.fields))?;
        state.end()
    }
}

inventory::collect!(CredentialEntry);
