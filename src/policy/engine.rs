use crate::policy::{
    LoadOptions, Policy, PolicyDescriptor, PolicyEngine, PolicyEngineError, PolicyExec, PolicyExecutionError,
    PolicyRunContext,
};
use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

/// Default engine adapter: policies load, expand per region and validate,
/// but a run only materializes its output skeleton (empty findings plus
/// the rule descriptor). The evaluating engine plugs in through the
/// `PolicyEngine` trait and replaces this adapter at link time.
pub struct DryRunEngine;

struct DryRunExec {
    name: String,
    descriptor: serde_json::Value,
}

impl PolicyExec for DryRunExec {
    fn run(&self, ctx: &PolicyRunContext) -> Result<(), PolicyExecutionError> {
        let dir = ctx.output_dir.join(&self.name);
        let io_err = |err: std::io::Error| PolicyExecutionError::Other {
            message: format!("cannot write policy output: {err}"),
        };
        fs::create_dir_all(&dir).map_err(io_err)?;
        fs::write(dir.join("resources.json"), b"[]").map_err(io_err)?;
        fs::write(
            dir.join("metadata.json"),
            serde_json::to_vec(&self.descriptor).unwrap_or_else(|_| b"{}".to_vec()),
        )
        .map_err(io_err)?;
        Ok(())
    }
}

impl PolicyEngine for DryRunEngine {
    fn register_resource_types(&self, types: &BTreeSet<String>) {
        debug!("registering {} resource types", types.len());
    }

    fn instantiate(&self, descriptor: &PolicyDescriptor, _options: &LoadOptions) -> Result<Policy, PolicyEngineError> {
        let rtype = descriptor
            .resource_types()
            .into_iter()
            .next()
            .ok_or_else(|| PolicyEngineError::CannotInstantiate {
                policy_name: descriptor.name.clone(),
                raw_error_message: "descriptor names no resource type".to_string(),
            })?;
        let provider = rtype.split('.').next().unwrap_or("aws").to_string();
        Ok(Policy::new(
            descriptor.name.clone(),
            provider,
            rtype,
            false,
            descriptor.comment.clone(),
            Arc::new(DryRunExec {
                name: descriptor.name.clone(),
                descriptor: serde_json::to_value(descriptor).unwrap_or(serde_json::Value::Null),
            }),
        ))
    }

    fn initialize_provider(
        &self,
        provider: &str,
        policies: Vec<Policy>,
        options: &LoadOptions,
    ) -> Result<Vec<Policy>, PolicyEngineError> {
        // aws policies run once per real target region, other providers
        // once; the synthetic global bucket is not a region
        let regions: Vec<&String> = options
            .regions
            .iter()
            .filter(|r| r.as_str() != crate::constants::GLOBAL_REGION)
            .collect();
        if provider != "aws" || regions.is_empty() {
            return Ok(policies);
        }
        let mut expanded = Vec::with_capacity(policies.len() * regions.len());
        for policy in policies {
            for region in &regions {
                let mut copy = policy.clone();
                copy.region = (*region).clone();
                expanded.push(copy);
            }
        }
        Ok(expanded)
    }

    fn validate(&self, _policy: &mut Policy) -> Result<(), PolicyEngineError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ResourceType;
    use maplit::btreeset;
    use std::path::PathBuf;

    fn descriptor(name: &str, resource: &str) -> PolicyDescriptor {
        PolicyDescriptor {
            name: name.to_string(),
            resource: ResourceType::One(resource.to_string()),
            comment: None,
            rest: serde_json::Map::new(),
        }
    }

    #[test]
    fn aws_policies_expand_per_region() {
        let engine = DryRunEngine;
        let options = LoadOptions {
            output_dir: PathBuf::from("/tmp"),
            regions: btreeset! {"eu-west-1".to_string(), "us-east-1".to_string()},
            cache_period_sec: 30,
        };
        let policy = engine.instantiate(&descriptor("p1", "ec2"), &options).unwrap();
        let expanded = engine.initialize_provider("aws", vec![policy], &options).unwrap();
        let regions: Vec<&str> = expanded.iter().map(|p| p.region.as_str()).collect();
        assert_eq!(regions, vec!["eu-west-1", "us-east-1"]);
    }

    #[test]
    fn run_writes_the_output_skeleton() {
        let engine = DryRunEngine;
        let tmp = tempfile::tempdir().unwrap();
        let options = LoadOptions {
            output_dir: tmp.path().to_path_buf(),
            regions: btreeset! {"eu-west-1".to_string()},
            cache_period_sec: 30,
        };
        let mut policy = engine.instantiate(&descriptor("p1", "ec2"), &options).unwrap();
        policy.region = "eu-west-1".to_string();
        policy.output_dir = tmp.path().join("eu-west-1");
        policy.run().unwrap();

        let resources = std::fs::read_to_string(tmp.path().join("eu-west-1/p1/resources.json")).unwrap();
        assert_eq!(resources, "[]");
        assert!(tmp.path().join("eu-west-1/p1/metadata.json").exists());
    }
}
