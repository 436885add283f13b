use crate::constants::GLOBAL_REGION;
use crate::models::rule::RuleIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

pub mod engine;
pub mod loader;

/// Raw policy mapping as shipped inside a rule-set. Only the fields the
/// orchestrator inspects are typed; the rest rides along for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    pub name: String,
    pub resource: ResourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceType {
    One(String),
    Many(Vec<String>),
}

impl PolicyDescriptor {
    /// Resource types this descriptor needs registered, `aws.` prefixed
    /// when the bare form is used.
    pub fn resource_types(&self) -> BTreeSet<String> {
        match &self.resource {
            ResourceType::Many(types) => types.iter().cloned().collect(),
            ResourceType::One(rtype) if rtype.contains('.') => BTreeSet::from([rtype.clone()]),
            ResourceType::One(rtype) => BTreeSet::from([format!("aws.{rtype}")]),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyEngineError {
    #[error("policy `{policy_name}` failed validation: {raw_error_message}")]
    ValidationFailed {
        policy_name: String,
        raw_error_message: String,
    },

    #[error("cannot instantiate policy `{policy_name}`: {raw_error_message}")]
    CannotInstantiate {
        policy_name: String,
        raw_error_message: String,
    },

    #[error("cannot initialize provider `{provider}`: {raw_error_message}")]
    ProviderInit {
        provider: String,
        raw_error_message: String,
    },
}

/// Error raised by a policy run, tagged with enough provider context for
/// the runner to classify it. No other exception crosses the per-policy
/// boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PolicyExecutionError {
    #[error("{code}: {message}")]
    AwsClient { code: String, message: String },

    #[error("{code}: {message}")]
    AzureCloud { code: String, message: String },

    #[error("google auth error: {message}")]
    GcpAuth { message: String },

    #[error("HTTP {status}: {reason}")]
    GcpHttp { status: u16, reason: String },

    #[error("{message}")]
    Other { message: String },
}

#[derive(Debug, Clone)]
pub struct PolicyRunContext {
    pub region: String,
    pub output_dir: PathBuf,
}

pub trait PolicyExec: Send + Sync {
    fn run(&self, ctx: &PolicyRunContext) -> Result<(), PolicyExecutionError>;
}

/// An executable policy produced by the embedded engine and prepared by
/// the loader. Findings land under `output_dir/<region>/<name>/`.
#[derive(Clone)]
pub struct Policy {
    pub name: String,
    pub provider: String,
    pub region: String,
    pub resource_type: String,
    pub service: String,
    pub global_resource: bool,
    pub comment: Option<String>,
    pub output_dir: PathBuf,
    exec: Arc<dyn PolicyExec>,
}

impl Policy {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        resource_type: impl Into<String>,
        global_resource: bool,
        comment: Option<String>,
        exec: Arc<dyn PolicyExec>,
    ) -> Self {
        let resource_type = resource_type.into();
        let service = resource_type
            .split('.')
            .nth(1)
            .unwrap_or(resource_type.as_str())
            .to_string();
        Policy {
            name: name.into(),
            provider: provider.into(),
            region: String::new(),
            resource_type,
            service,
            global_resource,
            comment,
            output_dir: PathBuf::new(),
            exec,
        }
    }

    pub fn run(&self) -> Result<(), PolicyExecutionError> {
        let ctx = PolicyRunContext {
            region: self.region.clone(),
            output_dir: self.output_dir.clone(),
        };
        self.exec.run(&ctx)
    }

    /// A policy runs once per job, ignoring the region list, iff its
    /// provider is not AWS, its comment marks it global, its resource type
    /// is global, or it talks to the one-endpoint s3 API.
    pub fn is_global(&self) -> bool {
        if self.provider != "aws" {
            return true;
        }
        if let Some(comment) = &self.comment {
            return RuleIndex::parse(comment).is_global;
        }
        self.global_resource || self.service == "s3"
    }

    /// Region recorded in failures and statistics.
    pub fn effective_region(&self) -> String {
        if self.is_global() {
            GLOBAL_REGION.to_string()
        } else {
            self.region.clone()
        }
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

/// Contract over the embedded policy engine: descriptor in, runnable
/// policy out. The engine is external to this crate.
pub trait PolicyEngine: Send + Sync {
    /// Pre-registers only the resource types the descriptors need.
    fn register_resource_types(&self, types: &BTreeSet<String>);

    fn instantiate(&self, descriptor: &PolicyDescriptor, options: &LoadOptions) -> Result<Policy, PolicyEngineError>;

    /// Provider-wide init, called once per provider group. May expand
    /// policies, one copy per target region.
    fn initialize_provider(
        &self,
        provider: &str,
        policies: Vec<Policy>,
        options: &LoadOptions,
    ) -> Result<Vec<Policy>, PolicyEngineError>;

    /// Variable expansion and non-schema validation of one policy.
    fn validate(&self, policy: &mut Policy) -> Result<(), PolicyEngineError>;
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub output_dir: PathBuf,
    pub regions: BTreeSet<String>,
    pub cache_period_sec: u64,
}
