//! Tool registry
//!
//! Tools are registered once at startup through a builder that rejects
//! duplicate names, then frozen into an immutable map for lock-free lookup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Error, Result};

/// Open-typed metadata describing a tool's accepted arguments
pub type Schema = serde_json::Map<String, Value>;

/// An executable tool
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool identifier
    fn name(&self) -> &str;

    /// Short human-readable summary
    fn description(&self) -> &str;

    /// Structured definition of accepted arguments
    fn schema(&self) -> Schema;

    /// Run the tool with the given JSON-encoded arguments
    async fn execute(&self, args: &str) -> Result<Value>;
}

/// Builds a [`ToolRegistry`], rejecting duplicate registrations
#[derive(Default)]
pub struct ToolRegistryBuilder {
    store: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistryBuilder {
    /// Create an empty builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name
    ///
    /// # Errors
    ///
    /// Returns error if a tool with the same name is already registered
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.store.contains_key(&name) {
            return Err(Error::Tool(format!("tool '{name}' already registered")));
        }
        self.store.insert(name, tool);
        Ok(())
    }

    /// Freeze the builder into an immutable registry
    #[must_use]
    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            store: Arc::new(self.store),
        }
    }
}

/// Immutable name -> tool mapping
#[derive(Clone)]
pub struct ToolRegistry {
    store: Arc<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    /// Look up a tool by name
    ///
    /// # Errors
    ///
    /// Returns error if no tool with that name exists
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.store
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Tool(format!("tool '{name}' not found")))
    }

    /// Run a tool by name with the given arguments
    ///
    /// # Errors
    ///
    /// Returns error if the tool is unknown or execution fails
    pub async fn execute(&self, name: &str, args: &str) -> Result<Value> {
        self.get(name)?.execute(args).await
    }

    /// All registered tools as (name, description) pairs
    #[must_use]
    pub fn list(&self) -> Vec<(String, String)> {
        self.store
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "echoes its arguments"
        }

        fn schema(&self) -> Schema {
            Schema::new()
        }

        async fn execute(&self, args: &str) -> Result<Value> {
            Ok(Value::String(args.to_string()))
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(Arc::new(EchoTool)).unwrap();

        let err = builder.register(Arc::new(EchoTool));
        assert!(matches!(err, Err(Error::Tool(_))));
    }

    #[tokio::test]
    async fn test_lookup_and_execute() {
        let mut builder = ToolRegistryBuilder::new();
        builder.register(Arc::new(EchoTool)).unwrap();
        let registry = builder.build();

        assert!(registry.get("echo").is_ok());
        assert!(registry.get("missing").is_err());

        let out = registry.execute("echo", "hello").await.unwrap();
        assert_eq!(out, Value::String("hello".to_string()));

        assert_eq!(registry.list().len(), 1);
    }
}
