//! Typed specification schema.
//!
//! A [`Specification`] is parsed once by an external parser (or deserialized
//! from JSON/TOML) and is treated as immutable by the orchestrator. Every
//! section is always present with defaults, so downstream code never has to
//! probe for missing fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Identifier of one semantic section of a specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionId {
    Metadata,
    Overview,
    Inputs,
    Outputs,
    Dependencies,
    ApiContract,
    TestCases,
    EdgeCases,
    ErrorHandling,
    Performance,
    Security,
    Implementation,
    Acceptance,
}

impl SectionId {
    /// All sections in canonical document order.
    pub const ALL: [SectionId; 13] = [
        SectionId::Metadata,
        SectionId::Overview,
        SectionId::Inputs,
        SectionId::Outputs,
        SectionId::Dependencies,
        SectionId::ApiContract,
        SectionId::TestCases,
        SectionId::EdgeCases,
        SectionId::ErrorHandling,
        SectionId::Performance,
        SectionId::Security,
        SectionId::Implementation,
        SectionId::Acceptance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionId::Metadata => "metadata",
            SectionId::Overview => "overview",
            SectionId::Inputs => "inputs",
            SectionId::Outputs => "outputs",
            SectionId::Dependencies => "dependencies",
            SectionId::ApiContract => "api_contract",
            SectionId::TestCases => "test_cases",
            SectionId::EdgeCases => "edge_cases",
            SectionId::ErrorHandling => "error_handling",
            SectionId::Performance => "performance",
            SectionId::Security => "security",
            SectionId::Implementation => "implementation",
            SectionId::Acceptance => "acceptance",
        }
    }

    /// Human-readable heading, e.g. "Api Contract".
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            })
            .collect::<Vec<String>>()
            .join(" ")
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SectionId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "metadata" => Ok(SectionId::Metadata),
            "overview" => Ok(SectionId::Overview),
            "inputs" => Ok(SectionId::Inputs),
            "outputs" => Ok(SectionId::Outputs),
            "dependencies" => Ok(SectionId::Dependencies),
            "api_contract" | "api" => Ok(SectionId::ApiContract),
            "test_cases" | "tests" => Ok(SectionId::TestCases),
            "edge_cases" => Ok(SectionId::EdgeCases),
            "error_handling" | "errors" => Ok(SectionId::ErrorHandling),
            "performance" => Ok(SectionId::Performance),
            "security" => Ok(SectionId::Security),
            "implementation" => Ok(SectionId::Implementation),
            "acceptance" => Ok(SectionId::Acceptance),
            _ => Err(Error::UnknownSection(s.to_string())),
        }
    }
}

/// Lifecycle status of a specification document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    #[default]
    Draft,
    Review,
    Approved,
    Implemented,
    Deprecated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub spec_id: String,
    pub version: String,
    pub status: SpecStatus,
    pub tech_stack: String,
    pub author: String,
    pub created: String,
    pub updated: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            spec_id: String::new(),
            version: "1.0.0".to_string(),
            status: SpecStatus::Draft,
            tech_stack: String::new(),
            author: String::new(),
            created: String::new(),
            updated: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Overview {
    pub summary: String,
    pub goals: Vec<String>,
    pub non_goals: Vec<String>,
    pub background: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputParam {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub default: String,
    pub description: String,
}

impl Default for InputParam {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: String::new(),
            required: true,
            default: String::new(),
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Inputs {
    pub user_inputs: Vec<InputParam>,
    pub system_inputs: Vec<InputParam>,
    pub env_vars: Vec<InputParam>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Outputs {
    pub return_values: Vec<String>,
    pub side_effects: Vec<String>,
    pub events: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Dependencies {
    pub internal: Vec<String>,
    pub external: Vec<String>,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Endpoint {
    pub method: String,
    pub path: String,
    pub request_body: String,
    pub response_body: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApiContract {
    pub endpoints: Vec<Endpoint>,
    pub error_codes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TestCase {
    pub test_id: String,
    pub description: String,
    pub input: String,
    pub expected_output: String,
    pub setup: String,
    pub teardown: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestCases {
    pub unit_tests: Vec<TestCase>,
    pub integration_tests: Vec<TestCase>,
    pub min_line_coverage: u32,
    pub min_branch_coverage: u32,
}

impl Default for TestCases {
    fn default() -> Self {
        Self {
            unit_tests: Vec::new(),
            integration_tests: Vec::new(),
            min_line_coverage: 80,
            min_branch_coverage: 70,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EdgeCases {
    pub boundary_conditions: Vec<String>,
    pub concurrency: Vec<String>,
    pub failure_modes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandling {
    pub error_types: Vec<String>,
    pub max_retries: u32,
    pub backoff_strategy: String,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        Self {
            error_types: Vec::new(),
            max_retries: 3,
            backoff_strategy: "exponential".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Performance {
    pub p50_ms: u32,
    pub p95_ms: u32,
    pub p99_ms: u32,
    pub target_rps: u32,
    pub memory_limit_mb: u32,
}

impl Default for Performance {
    fn default() -> Self {
        Self {
            p50_ms: 100,
            p95_ms: 500,
            p99_ms: 1000,
            target_rps: 100,
            memory_limit_mb: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Security {
    pub requires_auth: bool,
    pub auth_method: String,
    pub roles: Vec<String>,
    pub handles_pii: bool,
    pub encryption_at_rest: bool,
    pub encryption_in_transit: bool,
}

impl Default for Security {
    fn default() -> Self {
        Self {
            requires_auth: false,
            auth_method: String::new(),
            roles: Vec::new(),
            handles_pii: false,
            encryption_at_rest: false,
            encryption_in_transit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Implementation {
    pub algorithms: Vec<String>,
    pub patterns: Vec<String>,
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Acceptance {
    pub criteria: Vec<String>,
    pub done_definition: Vec<String>,
}

/// A complete, named specification document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Specification {
    pub name: String,
    pub metadata: Metadata,
    pub overview: Overview,
    pub inputs: Inputs,
    pub outputs: Outputs,
    pub dependencies: Dependencies,
    pub api_contract: ApiContract,
    pub test_cases: TestCases,
    pub edge_cases: EdgeCases,
    pub error_handling: ErrorHandling,
    pub performance: Performance,
    pub security: Security,
    pub implementation: Implementation,
    pub acceptance: Acceptance,
}

impl Specification {
    /// Create an empty specification with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// A specification is usable once it has a name and a spec id.
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.metadata.spec_id.is_empty()
    }

    /// Serialize one section to a JSON value.
    pub fn section_value(&self, id: SectionId) -> Value {
        let value = match id {
            SectionId::Metadata => serde_json::to_value(&self.metadata),
            SectionId::Overview => serde_json::to_value(&self.overview),
            SectionId::Inputs => serde_json::to_value(&self.inputs),
            SectionId::Outputs => serde_json::to_value(&self.outputs),
            SectionId::Dependencies => serde_json::to_value(&self.dependencies),
            SectionId::ApiContract => serde_json::to_value(&self.api_contract),
            SectionId::TestCases => serde_json::to_value(&self.test_cases),
            SectionId::EdgeCases => serde_json::to_value(&self.edge_cases),
            SectionId::ErrorHandling => serde_json::to_value(&self.error_handling),
            SectionId::Performance => serde_json::to_value(&self.performance),
            SectionId::Security => serde_json::to_value(&self.security),
            SectionId::Implementation => serde_json::to_value(&self.implementation),
            SectionId::Acceptance => serde_json::to_value(&self.acceptance),
        };
        // Plain structs of strings, numbers and string-keyed maps always serialize.
        value.unwrap_or(Value::Null)
    }

    /// Replace one section from a JSON value, validating it against the schema.
    pub fn set_section_value(&mut self, id: SectionId, value: Value) -> Result<()> {
        match id {
            SectionId::Metadata => self.metadata = serde_json::from_value(value)?,
            SectionId::Overview => self.overview = serde_json::from_value(value)?,
            SectionId::Inputs => self.inputs = serde_json::from_value(value)?,
            SectionId::Outputs => self.outputs = serde_json::from_value(value)?,
            SectionId::Dependencies => self.dependencies = serde_json::from_value(value)?,
            SectionId::ApiContract => self.api_contract = serde_json::from_value(value)?,
            SectionId::TestCases => self.test_cases = serde_json::from_value(value)?,
            SectionId::EdgeCases => self.edge_cases = serde_json::from_value(value)?,
            SectionId::ErrorHandling => self.error_handling = serde_json::from_value(value)?,
            SectionId::Performance => self.performance = serde_json::from_value(value)?,
            SectionId::Security => self.security = serde_json::from_value(value)?,
            SectionId::Implementation => self.implementation = serde_json::from_value(value)?,
            SectionId::Acceptance => self.acceptance = serde_json::from_value(value)?,
        }
        Ok(())
    }
}
