use crate::models::Cloud;
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// A customer-owned cloud account / subscription / project targeted by
/// scans. References between tenants, parents and applications are ids,
/// never pointers: the graph is cyclic in the source system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub name: String,
    pub customer_name: String,
    pub cloud: Cloud,
    /// Cloud-specific identifier: AWS account id, Azure subscription id or
    /// GCP project id.
    pub project: String,
    pub active: bool,
    pub regions: BTreeSet<String>,
    /// parent type -> parent id
    #[serde(default)]
    pub parent_map: HashMap<ParentType, String>,
    /// Maestro-style management parent, used only when management
    /// credentials are explicitly allowed.
    #[serde(default)]
    pub management_parent_id: Option<String>,
}

impl Tenant {
    pub fn linked_parent(&self, type_: ParentType) -> Option<&str> {
        self.parent_map.get(&type_).map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentType {
    /// Grants the orchestrator scanning access to the tenant.
    CustodianAccess,
    /// Licensing application binding.
    CustodianLicenses,
    /// Management account access, opt-in only.
    AwsManagement,
    /// Kubernetes cluster descriptor.
    Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parent {
    pub id: String,
    pub customer_id: String,
    pub tenant_name: String,
    pub type_: ParentType,
    pub application_id: String,
    pub is_deleted: bool,
    /// Free-form descriptor payload, e.g. the platform meta for
    /// `ParentType::Platform`.
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Credentials-bearing application linked to a parent.
#[derive(Derivative, Clone, Serialize, Deserialize)]
#[derivative(Debug)]
pub struct Application {
    pub id: String,
    pub customer_id: String,
    /// Secret-store key holding this application's payload (credentials or
    /// kubeconfig).
    #[derivative(Debug = "ignore")]
    pub secret: Option<String>,
    /// Inline credentials, serialized. Takes effect when no secret key is
    /// set.
    #[derivative(Debug = "ignore")]
    #[serde(default)]
    pub credentials: Option<serde_json::Value>,
    /// License key map kept on CUSTODIAN_LICENSES applications,
    /// cloud name -> license key.
    #[serde(default)]
    pub license_keys: HashMap<String, String>,
}

impl Application {
    pub fn license_key(&self, cloud: &str) -> Option<&str> {
        self.license_keys.get(cloud).map(String::as_str)
    }
}
