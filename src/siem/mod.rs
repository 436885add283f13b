use crate::clients::dojo::{DojoApi, ImportScanRequest};
use crate::clients::udm::UdmApi;
use crate::models::job::{BatchResults, Job};
use crate::models::platform::Platform;
use crate::models::tenant::Tenant;
use crate::sharding::ShardsCollection;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A finished scan seen by downstream integrations: either an API job or
/// an event-driven batch item.
pub enum ScanJob<'a> {
    Standard(&'a Job),
    EventDriven(&'a BatchResults),
}

impl ScanJob<'_> {
    pub fn id(&self) -> &str {
        match self {
            ScanJob::Standard(job) => &job.id,
            ScanJob::EventDriven(results) => &results.id,
        }
    }

    pub fn tenant_name(&self) -> &str {
        match self {
            ScanJob::Standard(job) => &job.tenant_name,
            ScanJob::EventDriven(results) => &results.tenant_name,
        }
    }

    pub fn customer_name(&self) -> &str {
        match self {
            ScanJob::Standard(job) => &job.customer_name,
            ScanJob::EventDriven(results) => &results.customer_name,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ScanJob::Standard(_) => "manual",
            ScanJob::EventDriven(_) => "reactive",
        }
    }
}

pub fn job_tags(job: &ScanJob) -> Vec<String> {
    vec![
        format!("job_id:{}", job.id()),
        format!("tenant:{}", job.tenant_name()),
        format!("customer:{}", job.customer_name()),
        format!("type:{}", job.type_name()),
    ]
}

/// Defect-tracker target names; `{placeholders}` are substituted per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DojoConfiguration {
    pub scan_type: String,
    pub product_type: String,
    pub product: String,
    pub engagement: String,
    pub test: String,
}

impl DojoConfiguration {
    pub fn substitute_fields(&self, job: &ScanJob, platform: Option<&Platform>) -> DojoConfiguration {
        let substitute = |template: &str| -> String {
            template
                .replace("{job_id}", job.id())
                .replace("{tenant_name}", job.tenant_name())
                .replace("{customer}", job.customer_name())
                .replace("{platform_id}", platform.map(|p| p.id.as_str()).unwrap_or(""))
        };
        DojoConfiguration {
            scan_type: self.scan_type.clone(),
            product_type: substitute(&self.product_type),
            product: substitute(&self.product),
            engagement: substitute(&self.engagement),
            test: substitute(&self.test),
        }
    }
}

pub struct DojoIntegration {
    pub api: Arc<dyn DojoApi>,
    pub configuration: DojoConfiguration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UdmConverterType {
    Events,
    Entities,
}

pub struct UdmIntegration {
    pub api: Arc<dyn UdmApi>,
    pub converter_type: UdmConverterType,
    pub log_type: String,
}

/// Which integrations are active for a tenant. Backed by customer
/// configuration in the real deployment.
pub trait IntegrationService: Send + Sync {
    fn dojo_adapters(&self, tenant: &Tenant) -> Vec<DojoIntegration>;
    fn udm_adapters(&self, tenant: &Tenant) -> Vec<UdmIntegration>;
}

pub struct NoIntegrations;

impl IntegrationService for NoIntegrations {
    fn dojo_adapters(&self, _tenant: &Tenant) -> Vec<DojoIntegration> {
        vec![]
    }

    fn udm_adapters(&self, _tenant: &Tenant) -> Vec<UdmIntegration> {
        vec![]
    }
}

/// Flattens a shard collection into the defect-tracker generic findings
/// format.
pub struct ShardCollectionDojoConvertor {
    scan_type: String,
}

impl ShardCollectionDojoConvertor {
    pub fn from_scan_type(scan_type: &str) -> Self {
        ShardCollectionDojoConvertor {
            scan_type: scan_type.to_string(),
        }
    }

    pub fn convert(&self, collection: &ShardsCollection) -> serde_json::Value {
        let mut findings = Vec::new();
        for index in collection.indexes() {
            let shard = match collection.shard(index) {
                Some(shard) => shard,
                None => continue,
            };
            for part in shard.parts() {
                let description = collection
                    .meta()
                    .get(&part.policy)
                    .and_then(|meta| meta.get("description"))
                    .and_then(|d| d.as_str())
                    .unwrap_or(&part.policy);
                for resource in &part.resources {
                    findings.push(serde_json::json!({
                        "title": part.policy,
                        "description": description,
                        "location": part.location,
                        "severity": "Info",
                        "data": resource,
                    }));
                }
            }
        }
        serde_json::json!({"scan_type": self.scan_type, "findings": findings})
    }
}

fn udm_records(collection: &ShardsCollection, tenant: &Tenant) -> Vec<(String, String, serde_json::Value)> {
    let mut records = Vec::new();
    for index in collection.indexes() {
        let shard = match collection.shard(index) {
            Some(shard) => shard,
            None => continue,
        };
        for part in shard.parts() {
            for resource in &part.resources {
                records.push((part.policy.clone(), part.location.clone(), resource.clone()));
            }
        }
    }
    let _ = tenant;
    records
}

/// UDM event payloads, one per finding.
pub struct ShardCollectionUdmEventsConvertor;

impl ShardCollectionUdmEventsConvertor {
    pub fn convert(collection: &ShardsCollection, tenant: &Tenant) -> Vec<serde_json::Value> {
        udm_records(collection, tenant)
            .into_iter()
            .map(|(policy, location, resource)| {
                serde_json::json!({
                    "metadata": {
                        "event_type": "SCAN_UNCATEGORIZED",
                        "event_timestamp": Utc::now().to_rfc3339(),
                        "product_name": "sentinel-engine",
                        "description": policy,
                    },
                    "principal": {"location": {"name": location}},
                    "target": {"resource": resource},
                    "additional": {"tenant": tenant.name, "cloud": tenant.cloud.as_str()},
                })
            })
            .collect()
    }
}

/// UDM entity payloads, one per finding.
pub struct ShardCollectionUdmEntitiesConvertor;

impl ShardCollectionUdmEntitiesConvertor {
    pub fn convert(collection: &ShardsCollection, tenant: &Tenant) -> Vec<serde_json::Value> {
        udm_records(collection, tenant)
            .into_iter()
            .map(|(policy, location, resource)| {
                serde_json::json!({
                    "metadata": {
                        "collected_timestamp": Utc::now().to_rfc3339(),
                        "vendor_name": "sentinel-engine",
                    },
                    "entity": {"resource": resource},
                    "detection": {"rule_name": policy, "location": location},
                    "additional": {"tenant": tenant.name},
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Cloud;
    use crate::sharding::{ShardPart, ShardsCollectionFactory};
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    fn tenant() -> Tenant {
        Tenant {
            name: "t1".to_string(),
            customer_name: "ACME".to_string(),
            cloud: Cloud::Aws,
            project: "123456789012".to_string(),
            active: true,
            regions: BTreeSet::new(),
            parent_map: HashMap::new(),
            management_parent_id: None,
        }
    }

    fn collection() -> ShardsCollection {
        let mut collection = ShardsCollectionFactory::from_cloud(Cloud::Aws);
        collection.put_parts([ShardPart {
            policy: "open-buckets".to_string(),
            location: "global".to_string(),
            timestamp: Utc::now(),
            resources: vec![json!({"name": "bucket-1"}), json!({"name": "bucket-2"})],
        }]);
        collection.set_meta(BTreeMap::from([(
            "open-buckets".to_string(),
            json!({"description": "Buckets open to the world"}),
        )]));
        collection
    }

    #[test]
    fn dojo_conversion_flattens_findings() {
        let converted = ShardCollectionDojoConvertor::from_scan_type("Generic Findings Import").convert(&collection());
        let findings = converted["findings"].as_array().unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0]["title"], "open-buckets");
        assert_eq!(findings[0]["description"], "Buckets open to the world");
    }

    #[test]
    fn placeholders_are_substituted() {
        let configuration = DojoConfiguration {
            scan_type: "Generic Findings Import".to_string(),
            product_type: "cloud".to_string(),
            product: "{tenant_name}".to_string(),
            engagement: "{customer}-{job_id}".to_string(),
            test: "scan".to_string(),
        };
        let job = Job {
            id: "j-1".to_string(),
            tenant_name: "t1".to_string(),
            customer_name: "ACME".to_string(),
            owner: "ops".to_string(),
            status: crate::models::JobStatus::Succeeded,
            submitted_at: Utc::now(),
            created_at: None,
            started_at: None,
            stopped_at: None,
            platform_id: None,
            rulesets: vec![],
            rules_to_scan: vec![],
            reason: None,
            ttl_days: None,
        };
        let substituted = configuration.substitute_fields(&ScanJob::Standard(&job), None);
        assert_eq!(substituted.product, "t1");
        assert_eq!(substituted.engagement, "ACME-j-1");
    }

    #[test]
    fn udm_events_carry_tenant_context() {
        let events = ShardCollectionUdmEventsConvertor::convert(&collection(), &tenant());
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["additional"]["tenant"], "t1");
        assert_eq!(events[0]["metadata"]["description"], "open-buckets");
    }
}
