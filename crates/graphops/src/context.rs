//! Context for task and trigger invocations.

use std::{collections::HashMap, sync::Arc};

use serde::de::DeserializeOwned;

use crate::{
    config::PluginConfig,
    credential::CredentialError,
    storage::{MemoryStorage, Storage},
};

/// Everything the host hands to a task or trigger besides its input.
///
/// Credentials are rendered by the host's secret mechanism right before the
/// invocation; they are never read from the environment by plugins.
#[derive(Debug, Clone)]
pub struct Context {
    execution_id: String,
    namespace: String,
    flow_id: String,
    credentials: HashMap<String, HashMap<String, String>>,
    storage: Arc<dyn Storage>,
    config: Arc<PluginConfig>,
}

impl Context {
    /// Creates a context backed by the host's storage and configuration.
    #[must_use]
    pub fn new(
        execution_id: &str,
        namespace: &str,
        flow_id: &str,
        storage: Arc<dyn Storage>,
        config: Arc<PluginConfig>,
    ) -> Self {
        Self {
            execution_id: execution_id.to_string(),
            namespace: namespace.to_string(),
            flow_id: flow_id.to_string(),
            credentials: HashMap::new(),
            storage,
            config,
        }
    }

    /// Creates an empty context with in-memory storage and default config,
    /// useful for testing.
    #[must_use]
    pub fn empty() -> Self {
        Self::with_metadata("", "", "")
    }

    /// Creates a context with the specified metadata, useful for testing.
    #[must_use]
    pub fn with_metadata(execution_id: &str, namespace: &str, flow_id: &str) -> Self {
        Self::new(
            execution_id,
            namespace,
            flow_id,
            Arc::new(MemoryStorage::new()),
            Arc::new(PluginConfig::default()),
        )
    }

    /// Host-generated id correlating logs of one flow execution.
    #[must_use]
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    #[must_use]
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Retrieves a credential by name, deserializing into the requested type.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if the host did not render the
    /// credential, or [`CredentialError::DeserializationError`] if its values
    /// do not fit `T`.
    pub fn credential<T: DeserializeOwned>(&self, name: &str) -> Result<T, CredentialError> {
        let cred_map = self
            .credentials
            .get(name)
            .ok_or_else(|| CredentialError::NotFound(name.to_string()))?;

        serde_json::to_value(cred_map)
            .and_then(serde_json::from_value)
            .map_err(|e| CredentialError::DeserializationError(e.to_string()))
    }

    /// Adds rendered credential values.
    #[must_use]
    pub fn with_credential(mut self, name: &str, values: HashMap<String, String>) -> Self {
        self.credentials.insert(name.to_string(), values);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: PluginConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct TestCred {
        access_token: String,
        endpoint: Option<String>,
    }

    #[test]
    fn test_context_with_metadata() {
        let ctx = Context::with_metadata("exec-1", "company.team", "nightly-sync");

        assert_eq!(ctx.execution_id(), "exec-1");
        assert_eq!(ctx.namespace(), "company.team");
        assert_eq!(ctx.flow_id(), "nightly-sync");
        assert_eq!(*ctx.config(), PluginConfig::default());
    }

    #[test]
    fn test_credential_deserializes_rendered_values() {
        let mut values = HashMap::new();
        values.insert("access_token".to_string(), "token-123".to_string());

        let ctx = Context::empty().with_credential("microsoft", values);
        let cred: TestCred = ctx.credential("microsoft").unwrap();

        assert_eq!(cred.access_token, "token-123");
        assert_eq!(cred.endpoint, None);
    }

    #[test]
    fn test_missing_credential_is_not_found() {
        let result: Result<TestCred, _> = Context::empty().credential("microsoft");

        assert!(matches!(result, Err(CredentialError::NotFound(name)) if name == "microsoft"));
    }

    #[test]
    fn test_credential_missing_required_field_fails_deserialization() {
        let mut values = HashMap::new();
        values.insert("endpoint".to_string(), "https://example.com".to_string());

        let ctx = Context::empty().with_credential("microsoft", values);
        let result: Result<TestCred, _> = ctx.credential("microsoft");

        assert!(matches!(result, Err(CredentialError::DeserializationError(_))));
    }

    #[test]
    fn test_with_config_replaces_defaults() {
        let mut config = PluginConfig::default();
        config.trigger.interval_secs = 5;

        let ctx = Context::empty().with_config(config);

        assert_eq!(ctx.config().trigger.interval_secs, 5);
    }
}
