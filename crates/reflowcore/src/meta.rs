//! Declared shape of a node type: inputs, outputs, state fields and the
//! class-level error policy.
//!
//! A [`NodeMeta`] snapshot is attached to every compiled node so downstream
//! components never need to go back to the registry.

use crate::{NodeId, NodeInstance, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How inbound values for one input property are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationMode {
    /// Newest value overwrites the previous one.
    #[default]
    Single,
    /// One array element per source edge.
    Multi,
    /// All emissions of a source, delivered as an array once it completes.
    Buffer,
    /// Every emission of every source, flattened into one array.
    MultiBuffer,
}

impl AggregationMode {
    pub fn is_multi(self) -> bool {
        matches!(self, AggregationMode::Multi | AggregationMode::MultiBuffer)
    }

    pub fn is_buffer(self) -> bool {
        matches!(self, AggregationMode::Buffer | AggregationMode::MultiBuffer)
    }

    /// Aggregated inputs hold computed arrays and are cleared before each run.
    pub fn is_aggregated(self) -> bool {
        self != AggregationMode::Single
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSpec {
    pub property: String,
    #[serde(default)]
    pub aggregation: AggregationMode,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

impl InputSpec {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            aggregation: AggregationMode::Single,
            required: false,
            default_value: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn multi(mut self) -> Self {
        self.aggregation = if self.aggregation.is_buffer() {
            AggregationMode::MultiBuffer
        } else {
            AggregationMode::Multi
        };
        self
    }

    pub fn buffer(mut self) -> Self {
        self.aggregation = if self.aggregation.is_multi() {
            AggregationMode::MultiBuffer
        } else {
            AggregationMode::Buffer
        };
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Required and without a default: a node cannot run until an edge fills it.
    pub fn must_be_fed(&self) -> bool {
        self.required && self.default_value.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub property: String,
    /// An unset router output suppresses its outgoing edges.
    #[serde(default)]
    pub router: bool,
    /// Channel outputs are rebuilt from `initial` on every construction and
    /// never serialized or copied between instances.
    #[serde(default)]
    pub channel: bool,
    #[serde(default)]
    pub initial: Value,
}

impl OutputSpec {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            router: false,
            channel: false,
            initial: Value::Null,
        }
    }

    pub fn router(mut self) -> Self {
        self.router = true;
        self
    }

    pub fn channel(mut self) -> Self {
        self.channel = true;
        self
    }

    pub fn with_initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = value.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub property: String,
    #[serde(default)]
    pub initial: Value,
}

impl StateSpec {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            initial: Value::Null,
        }
    }

    pub fn with_initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = value.into();
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStrategy {
    Retry,
    Skip,
    #[default]
    Fail,
    Abort,
}

/// Class-level failure handling for a node type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    pub strategy: ErrorStrategy,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_factor: f64,
}

impl ErrorPolicy {
    pub fn retry(max_retries: u32, retry_delay_ms: u64, backoff_factor: f64) -> Self {
        Self {
            strategy: ErrorStrategy::Retry,
            max_retries,
            retry_delay_ms,
            backoff_factor,
        }
    }

    pub fn with_strategy(strategy: ErrorStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based): `delay * backoff^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = self.retry_delay_ms as f64 * self.backoff_factor.powi(exponent);
        if millis.is_finite() && millis > 0.0 {
            Duration::from_millis(millis as u64)
        } else {
            Duration::ZERO
        }
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            strategy: ErrorStrategy::Fail,
            max_retries: 0,
            retry_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }
}

/// Metadata snapshot attached to a compiled node.
///
/// Property lists keep registration order; when a property is declared more
/// than once the latest declaration is the effective one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeMeta {
    pub class: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    pub states: Vec<StateSpec>,
    pub error_policy: ErrorPolicy,
}

impl NodeMeta {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }

    pub fn input(&self, property: &str) -> Option<&InputSpec> {
        self.inputs.iter().rev().find(|i| i.property == property)
    }

    pub fn output(&self, property: &str) -> Option<&OutputSpec> {
        self.outputs.iter().rev().find(|o| o.property == property)
    }

    pub fn state(&self, property: &str) -> Option<&StateSpec> {
        self.states.iter().rev().find(|s| s.property == property)
    }

    pub fn declares(&self, property: &str) -> bool {
        self.input(property).is_some()
            || self.output(property).is_some()
            || self.state(property).is_some()
    }

    pub fn is_router(&self, property: &str) -> bool {
        self.output(property).is_some_and(|o| o.router)
    }

    pub fn is_channel(&self, property: &str) -> bool {
        self.output(property).is_some_and(|o| o.channel)
    }

    pub fn aggregation(&self, property: &str) -> AggregationMode {
        self.input(property)
            .map(|i| i.aggregation)
            .unwrap_or_default()
    }

    /// Input properties that must be supplied by an edge, in declaration order.
    pub fn required_inputs(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for input in &self.inputs {
            if seen.contains(&input.property.as_str()) {
                continue;
            }
            seen.push(input.property.as_str());
        }
        seen.into_iter()
            .filter(|p| self.input(p).is_some_and(InputSpec::must_be_fed))
            .collect()
    }

    /// Effective (deduplicated) output specs in declaration order.
    pub fn effective_outputs(&self) -> Vec<&OutputSpec> {
        let mut out: Vec<&OutputSpec> = Vec::new();
        for spec in &self.outputs {
            if !out.iter().any(|o| o.property == spec.property) {
                out.extend(self.output(&spec.property));
            }
        }
        out
    }

    /// Effective (deduplicated) input specs in declaration order.
    pub fn effective_inputs(&self) -> Vec<&InputSpec> {
        let mut out: Vec<&InputSpec> = Vec::new();
        for spec in &self.inputs {
            if !out.iter().any(|i| i.property == spec.property) {
                out.extend(self.input(&spec.property));
            }
        }
        out
    }

    /// Channel outputs at their declared initial values.
    pub fn fresh_channels(&self) -> BTreeMap<String, Value> {
        self.effective_outputs()
            .into_iter()
            .filter(|o| o.channel)
            .map(|o| (o.property.clone(), o.initial.clone()))
            .collect()
    }

    /// Build a default instance of this type: inputs at their defaults,
    /// non-channel outputs and state fields at their initial values.
    pub fn instantiate(meta: &Arc<NodeMeta>, id: NodeId) -> NodeInstance {
        let mut fields = BTreeMap::new();
        for input in meta.effective_inputs() {
            let value = match (&input.default_value, input.aggregation.is_aggregated()) {
                (Some(v), _) => v.clone(),
                (None, true) => Value::Array(Vec::new()),
                (None, false) => continue,
            };
            fields.insert(input.property.clone(), value);
        }
        for output in meta.effective_outputs().into_iter().filter(|o| !o.channel) {
            fields.insert(output.property.clone(), output.initial.clone());
        }
        for state in &meta.states {
            fields.insert(state.property.clone(), state.initial.clone());
        }
        NodeInstance::from_parts(id, meta.class.clone(), fields, Arc::clone(meta))
    }
}
