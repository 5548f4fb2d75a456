use reflowcore::{
    AsyncHandler, AsyncNodeHandler, ErrorPolicy, InputSpec, NodeHandler, NodeMeta, OutputSpec,
    StateSpec,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Declaration of a node type, built once at process start and handed to
/// [`NodeRegistry::register`].
pub struct NodeType {
    name: String,
    description: String,
    category: String,
    inputs: Vec<InputSpec>,
    outputs: Vec<OutputSpec>,
    states: Vec<StateSpec>,
    error_policy: Option<ErrorPolicy>,
    handler: Option<Arc<dyn NodeHandler>>,
}

impl NodeType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            states: Vec::new(),
            error_policy: None,
            handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn state(mut self, spec: StateSpec) -> Self {
        self.states.push(spec);
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = Some(policy);
        self
    }

    pub fn handler(mut self, handler: impl NodeHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn async_handler(self, handler: impl AsyncNodeHandler) -> Self {
        self.handler(AsyncHandler::new(handler))
    }
}

/// Metadata about a node type
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub name: String,
    pub description: String,
    pub category: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub states: Vec<StateSpec>,
    pub error_policy: ErrorPolicy,
}

struct Entry {
    meta: Arc<NodeMeta>,
    handler: Option<Arc<dyn NodeHandler>>,
    description: String,
    category: String,
}

/// Registry of available node types.
///
/// Registration is additive: declaring a type name again appends its specs
/// to the existing entry, and lookups resolve each property to its latest
/// declaration.
pub struct NodeRegistry {
    entries: HashMap<String, Entry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a node type
    pub fn register(&mut self, node_type: NodeType) {
        tracing::info!("Registering node type: {}", node_type.name);
        let NodeType {
            name,
            description,
            category,
            inputs,
            outputs,
            states,
            error_policy,
            handler,
        } = node_type;

        let entry = self.entries.entry(name.clone()).or_insert_with(|| Entry {
            meta: Arc::new(NodeMeta::new(name)),
            handler: None,
            description: String::new(),
            category: "general".to_string(),
        });

        let meta = Arc::make_mut(&mut entry.meta);
        meta.inputs.extend(inputs);
        meta.outputs.extend(outputs);
        meta.states.extend(states);
        if let Some(policy) = error_policy {
            meta.error_policy = policy;
        }
        if handler.is_some() {
            entry.handler = handler;
        }
        if !description.is_empty() {
            entry.description = description;
        }
        if !category.is_empty() {
            entry.category = category;
        }
    }

    /// Metadata snapshot attached to compiled nodes of this type
    pub fn metadata(&self, node_type: &str) -> Option<Arc<NodeMeta>> {
        self.entries.get(node_type).map(|e| Arc::clone(&e.meta))
    }

    pub fn handler(&self, node_type: &str) -> Option<Arc<dyn NodeHandler>> {
        self.entries.get(node_type).and_then(|e| e.handler.clone())
    }

    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// Get all registered node types, sorted by name
    pub fn list_node_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.entries.get(node_type).map(|e| NodeMetadata {
            name: e.meta.class.clone(),
            description: e.description.clone(),
            category: e.category.clone(),
            inputs: e.meta.effective_inputs().into_iter().cloned().collect(),
            outputs: e.meta.effective_outputs().into_iter().cloned().collect(),
            states: e.meta.states.clone(),
            error_policy: e.meta.error_policy.clone(),
        })
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
