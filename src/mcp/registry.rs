//! Name-keyed store of tools and resources.
//!
//! Tools and resources share one namespace. Entries are kept in registration
//! order so listings are stable across runs. The registry is filled once at
//! startup and then shared read-only behind an `Arc`.

use indexmap::map::Values;
use indexmap::IndexMap;

use crate::error::RegistryError;
use crate::mcp::schema::{ResourceDescriptor, ToolDescriptor};

/// A registered item.
#[derive(Debug, Clone)]
pub enum Entry {
    /// A callable tool.
    Tool(ToolDescriptor),
    /// A readable resource.
    Resource(ResourceDescriptor),
}

impl Entry {
    /// The key this entry is stored under.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Tool(tool) => tool.name(),
            Self::Resource(resource) => resource.uri(),
        }
    }
}

/// Registered tools and resources.
#[derive(Debug, Default)]
pub struct Registry {
    entries: IndexMap<String, Entry>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateName`] if the name is taken; the
    /// existing entry is left untouched.
    pub fn register(&mut self, entry: Entry) -> Result<(), RegistryError> {
        let name = entry.name().to_string();
        if self.entries.contains_key(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        tracing::debug!(name = %name, "Registered");
        self.entries.insert(name, entry);
        Ok(())
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_tool(&mut self, tool: ToolDescriptor) -> Result<(), RegistryError> {
        self.register(Entry::Tool(tool))
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_resource(&mut self, resource: ResourceDescriptor) -> Result<(), RegistryError> {
        self.register(Entry::Resource(resource))
    }

    /// Looks up an entry of either kind.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if nothing is registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<&Entry, RegistryError> {
        self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            name: name.to_string(),
        })
    }

    /// Looks up a tool.
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        match self.entries.get(name) {
            Some(Entry::Tool(tool)) => Some(tool),
            _ => None,
        }
    }

    /// Looks up a resource by URI.
    #[must_use]
    pub fn resource(&self, uri: &str) -> Option<&ResourceDescriptor> {
        match self.entries.get(uri) {
            Some(Entry::Resource(resource)) => Some(resource),
            _ => None,
        }
    }

    /// All entries in registration order.
    ///
    /// The iterator is `Clone`, so it can be restarted.
    pub fn list(&self) -> Values<'_, String, Entry> {
        self.entries.values()
    }

    /// Registered tools in registration order.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> + Clone {
        self.list().filter_map(|entry| match entry {
            Entry::Tool(tool) => Some(tool),
            Entry::Resource(_) => None,
        })
    }

    /// Registered resources in registration order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDescriptor> + Clone {
        self.list().filter_map(|entry| match entry {
            Entry::Resource(resource) => Some(resource),
            Entry::Tool(_) => None,
        })
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::handler::{resource_fn, tool_fn, Arguments, ToolError};
    use crate::mcp::schema::{ParamSpec, ToolSpec};
    use serde_json::json;

    fn tool(name: &str, summary: &str) -> ToolDescriptor {
        ToolSpec::new(name)
            .summary(summary)
            .param(ParamSpec::new("x", "integer"))
            .build(tool_fn(|_a: Arguments| async { Ok::<_, ToolError>(json!(1)) }))
            .unwrap()
    }

    fn resource(uri: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            uri,
            "r",
            resource_fn(|| async { Ok::<_, ToolError>(String::new()) }),
        )
    }

    #[test]
    fn registration_order_is_kept() {
        let mut registry = Registry::new();
        registry.register_tool(tool("b", "second letter")).unwrap();
        registry.register_resource(resource("server://info")).unwrap();
        registry.register_tool(tool("a", "first letter")).unwrap();

        let names: Vec<&str> = registry.list().map(Entry::name).collect();
        assert_eq!(names, ["b", "server://info", "a"]);

        let tools: Vec<&str> = registry.tools().map(ToolDescriptor::name).collect();
        assert_eq!(tools, ["b", "a"]);
        assert_eq!(registry.resources().count(), 1);
    }

    #[test]
    fn list_is_restartable() {
        let mut registry = Registry::new();
        registry.register_tool(tool("a", "s")).unwrap();
        registry.register_tool(tool("b", "s")).unwrap();

        let iter = registry.list();
        let again = iter.clone();
        assert_eq!(iter.count(), 2);
        assert_eq!(again.count(), 2);
    }

    #[test]
    fn duplicate_keeps_first_entry() {
        let mut registry = Registry::new();
        registry.register_tool(tool("a", "original")).unwrap();
        let err = registry.register_tool(tool("a", "impostor")).unwrap_err();
        assert_eq!(
            err,
            RegistryError::DuplicateName {
                name: "a".to_string()
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.tool("a").unwrap().doc().summary, "original");
    }

    #[test]
    fn names_are_shared_across_kinds() {
        let mut registry = Registry::new();
        registry.register_resource(resource("dup")).unwrap();
        assert!(registry.register_tool(tool("dup", "s")).is_err());
    }

    #[test]
    fn lookup_and_typed_access() {
        let mut registry = Registry::new();
        registry.register_tool(tool("a", "s")).unwrap();
        registry.register_resource(resource("server://info")).unwrap();

        assert!(matches!(registry.lookup("a"), Ok(Entry::Tool(_))));
        assert!(matches!(
            registry.lookup("missing"),
            Err(RegistryError::NotFound { .. })
        ));
        assert!(registry.tool("server://info").is_none());
        assert!(registry.resource("a").is_none());
        assert!(registry.resource("server://info").is_some());
        assert!(!registry.is_empty());
    }

    #[test]
    fn descriptor_matches_declaration() {
        let mut registry = Registry::new();
        registry.register_tool(tool("a", "s")).unwrap();
        let listed = registry.tool("a").unwrap().input_schema();
        assert_eq!(listed["properties"]["x"]["type"], json!("integer"));
        assert_eq!(listed["required"], json!(["x"]));
        assert_eq!(registry.tool("a").unwrap().returns().to_string(), "object");
    }
}
