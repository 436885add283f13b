use crate::models::Cloud;
use crate::scan::runner::FailedPolicies;
use crate::sharding::ShardPart;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

const RESOURCES_FILE: &str = "resources.json";
const METADATA_FILE: &str = "metadata.json";

/// Reads the engine's output directory after all regions finished:
/// `<work_dir>/<region>/<policy>/resources.json` plus a per-policy
/// `metadata.json` descriptor.
pub struct JobResult {
    work_dir: PathBuf,
    cloud: Cloud,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub tenant: String,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub per_rule: Vec<RuleStatistics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleStatistics {
    pub region: String,
    pub rule: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub traceback: Vec<String>,
}

impl JobResult {
    pub fn new(work_dir: &Path, cloud: Cloud) -> Self {
        JobResult {
            work_dir: work_dir.to_path_buf(),
            cloud,
        }
    }

    pub fn cloud(&self) -> Cloud {
        self.cloud
    }

    fn region_dirs(&self) -> Vec<(String, PathBuf)> {
        let mut dirs = Vec::new();
        let entries = match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(_) => return dirs,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                dirs.push((name.to_string(), path));
            }
        }
        dirs.sort();
        dirs
    }

    fn policy_dirs(region_dir: &Path) -> Vec<(String, PathBuf)> {
        let mut dirs = Vec::new();
        let entries = match fs::read_dir(region_dir) {
            Ok(entries) => entries,
            Err(_) => return dirs,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir()
                && let Some(name) = entry.file_name().to_str()
            {
                dirs.push((name.to_string(), path));
            }
        }
        dirs.sort();
        dirs
    }

    /// One shard part per (region, policy) output.
    pub fn iter_shard_parts(&self) -> Vec<ShardPart> {
        let timestamp = Utc::now();
        let mut parts = Vec::new();
        for (region, region_dir) in self.region_dirs() {
            for (policy, policy_dir) in Self::policy_dirs(&region_dir) {
                let resources_path = policy_dir.join(RESOURCES_FILE);
                let raw = match fs::read(&resources_path) {
                    Ok(raw) => raw,
                    Err(_) => continue,
                };
                let resources: Vec<serde_json::Value> = match serde_json::from_slice(&raw) {
                    Ok(resources) => resources,
                    Err(err) => {
                        warn!("cannot parse {}: {err}", resources_path.display());
                        continue;
                    }
                };
                parts.push(ShardPart {
                    policy,
                    location: region.clone(),
                    timestamp,
                    resources,
                });
            }
        }
        parts
    }

    /// rule name -> engine-provided descriptor
    pub fn rules_meta(&self) -> BTreeMap<String, serde_json::Value> {
        let mut meta = BTreeMap::new();
        for (_region, region_dir) in self.region_dirs() {
            for (policy, policy_dir) in Self::policy_dirs(&region_dir) {
                if meta.contains_key(&policy) {
                    continue;
                }
                let raw = match fs::read(policy_dir.join(METADATA_FILE)) {
                    Ok(raw) => raw,
                    Err(_) => continue,
                };
                if let Ok(descriptor) = serde_json::from_slice::<serde_json::Value>(&raw) {
                    meta.insert(policy, descriptor);
                }
            }
        }
        meta
    }

    pub fn statistics(
        &self,
        tenant_name: &str,
        started_at: Option<DateTime<Utc>>,
        stopped_at: Option<DateTime<Utc>>,
        failed: &FailedPolicies,
    ) -> Statistics {
        let mut per_rule = Vec::new();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();

        for ((region, rule), failure) in failed {
            seen.insert((region.clone(), rule.clone()));
            per_rule.push(RuleStatistics {
                region: region.clone(),
                rule: rule.clone(),
                status: failure.error_type.to_string(),
                message: failure.message.clone(),
                traceback: failure.traceback.clone(),
            });
        }
        for (region, region_dir) in self.region_dirs() {
            for (rule, _policy_dir) in Self::policy_dirs(&region_dir) {
                if seen.contains(&(region.clone(), rule.clone())) {
                    continue;
                }
                per_rule.push(RuleStatistics {
                    region: region.clone(),
                    rule,
                    status: "SUCCEEDED".to_string(),
                    message: None,
                    traceback: vec![],
                });
            }
        }
        per_rule.sort_by(|a, b| a.region.cmp(&b.region).then_with(|| a.rule.cmp(&b.rule)));

        Statistics {
            tenant: tenant_name.to_string(),
            started_at,
            stopped_at,
            per_rule,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PolicyErrorType;
    use crate::scan::runner::PolicyFailure;
    use serde_json::json;

    fn write_policy_output(work_dir: &Path, region: &str, policy: &str, resources: serde_json::Value) {
        let dir = work_dir.join(region).join(policy);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RESOURCES_FILE), serde_json::to_vec(&resources).unwrap()).unwrap();
        fs::write(
            dir.join(METADATA_FILE),
            serde_json::to_vec(&json!({"resource": "aws.ec2", "description": policy})).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn collects_parts_and_meta_from_output_tree() {
        let tmp = tempfile::tempdir().unwrap();
        write_policy_output(tmp.path(), "eu-west-1", "r1", json!([{"id": "i-1"}]));
        write_policy_output(tmp.path(), "global", "r2", json!([]));

        let result = JobResult::new(tmp.path(), Cloud::Aws);
        let parts = result.iter_shard_parts();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().any(|p| p.policy == "r1" && p.location == "eu-west-1"));

        let meta = result.rules_meta();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta["r1"]["resource"], "aws.ec2");
    }

    #[test]
    fn statistics_mix_failures_and_successes() {
        let tmp = tempfile::tempdir().unwrap();
        write_policy_output(tmp.path(), "eu-west-1", "ok-rule", json!([]));

        let mut failed = FailedPolicies::new();
        failed.insert(
            ("eu-west-1".to_string(), "broken-rule".to_string()),
            PolicyFailure {
                error_type: PolicyErrorType::Access,
                message: Some("denied".to_string()),
                traceback: vec![],
            },
        );

        let result = JobResult::new(tmp.path(), Cloud::Aws);
        let statistics = result.statistics("t1", None, None, &failed);
        assert_eq!(statistics.per_rule.len(), 2);
        let broken = statistics.per_rule.iter().find(|r| r.rule == "broken-rule").unwrap();
        assert_eq!(broken.status, "ACCESS");
        let ok = statistics.per_rule.iter().find(|r| r.rule == "ok-rule").unwrap();
        assert_eq!(ok.status, "SUCCEEDED");
    }
}
