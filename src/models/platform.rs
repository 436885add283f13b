use crate::models::tenant::Parent;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformType {
    Eks,
    Native,
}

impl FromStr for PlatformType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "EKS" => Ok(PlatformType::Eks),
            "NATIVE" => Ok(PlatformType::Native),
            _ => Err(format!("unknown platform type `{s}`")),
        }
    }
}

/// A Kubernetes cluster descriptor bound to a tenant through a
/// `ParentType::Platform` parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Platform {
    pub id: String,
    pub tenant_name: String,
    pub customer_id: String,
    pub type_: PlatformType,
    pub region: String,
    /// Cluster name, also the `x-k8s-aws-id` value for EKS tokens.
    pub name: String,
    /// Application carrying the kubeconfig or linked credentials.
    pub application_id: String,
}

impl Platform {
    /// Platform descriptors are persisted as parent meta; this lifts the
    /// typed view out of the stored row.
    pub fn from_parent(parent: &Parent) -> Result<Platform, String> {
        let meta = parent
            .meta
            .as_object()
            .ok_or_else(|| format!("parent {} carries no platform meta", parent.id))?;
        let str_field = |key: &str| -> Result<String, String> {
            meta.get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| format!("platform meta of parent {} misses `{key}`", parent.id))
        };

        Ok(Platform {
            id: parent.id.clone(),
            tenant_name: parent.tenant_name.clone(),
            customer_id: parent.customer_id.clone(),
            type_: PlatformType::from_str(&str_field("type")?)?,
            region: str_field("region")?,
            name: str_field("name")?,
            application_id: parent.application_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tenant::ParentType;
    use serde_json::json;

    fn platform_parent() -> Parent {
        Parent {
            id: "p-1".to_string(),
            customer_id: "ACME".to_string(),
            tenant_name: "t1".to_string(),
            type_: ParentType::Platform,
            application_id: "app-1".to_string(),
            is_deleted: false,
            meta: json!({"type": "EKS", "region": "eu-west-1", "name": "prod-cluster"}),
        }
    }

    #[test]
    fn platform_from_parent_meta() {
        let platform = Platform::from_parent(&platform_parent()).unwrap();
        assert_eq!(platform.type_, PlatformType::Eks);
        assert_eq!(platform.name, "prod-cluster");
        assert_eq!(platform.region, "eu-west-1");
    }

    #[test]
    fn platform_meta_missing_field() {
        let mut parent = platform_parent();
        parent.meta = json!({"type": "NATIVE"});
        assert!(Platform::from_parent(&parent).is_err());
    }
}
