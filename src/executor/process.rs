use crate::cmd::command::{CommandKiller, ScanCommand};
use crate::constants::GLOBAL_REGION;
use crate::models::Cloud;
use crate::policy::loader::PoliciesLoader;
use crate::policy::{PolicyDescriptor, PolicyEngine};
use crate::scan::runner::{FailedPolicies, PolicyFailure, Runner};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// One region's scan, fenced into its own process image: the embedded
/// engine retains memory, so each region's child fully exits before the
/// next begins. Failures come back over stdout as one JSON line.
#[derive(Debug, Clone)]
pub struct RegionScan {
    pub cloud: Cloud,
    pub region: String,
    pub policies_file: PathBuf,
    pub work_dir: PathBuf,
    pub deadline: DateTime<Utc>,
}

pub const SCAN_REGION_FLAG: &str = "--scan-region";

impl RegionScan {
    pub fn to_args(&self) -> Vec<String> {
        vec![
            SCAN_REGION_FLAG.to_string(),
            self.region.clone(),
            "--cloud".to_string(),
            self.cloud.to_string(),
            "--policies-file".to_string(),
            self.policies_file.to_string_lossy().to_string(),
            "--work-dir".to_string(),
            self.work_dir.to_string_lossy().to_string(),
            "--deadline".to_string(),
            self.deadline.to_rfc3339(),
        ]
    }

    pub fn from_args(args: &[String]) -> Result<RegionScan, String> {
        let value_of = |flag: &str| -> Result<String, String> {
            args.iter()
                .position(|a| a == flag)
                .and_then(|i| args.get(i + 1))
                .cloned()
                .ok_or_else(|| format!("missing `{flag}` argument"))
        };
        Ok(RegionScan {
            cloud: Cloud::from_str(&value_of("--cloud")?)?,
            region: value_of(SCAN_REGION_FLAG)?,
            policies_file: PathBuf::from(value_of("--policies-file")?),
            work_dir: PathBuf::from(value_of("--work-dir")?),
            deadline: DateTime::parse_from_rfc3339(&value_of("--deadline")?)
                .map_err(|err| format!("invalid deadline: {err}"))?
                .with_timezone(&Utc),
        })
    }
}

/// Wire form of the per-policy failures, JSON-over-pipe between child and
/// parent.
#[derive(Debug, Serialize, Deserialize)]
struct WireFailure {
    region: String,
    rule: String,
    #[serde(flatten)]
    failure: PolicyFailure,
}

pub fn encode_failures(failed: &FailedPolicies) -> String {
    let wire: Vec<WireFailure> = failed
        .iter()
        .map(|((region, rule), failure)| WireFailure {
            region: region.clone(),
            rule: rule.clone(),
            failure: failure.clone(),
        })
        .collect();
    serde_json::to_string(&wire).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_failures(line: &str) -> Option<FailedPolicies> {
    let wire: Vec<WireFailure> = serde_json::from_str(line).ok()?;
    Some(
        wire.into_iter()
            .map(|entry| ((entry.region, entry.rule), entry.failure))
            .collect(),
    )
}

/// Child side: load the policies narrowed to one region and run them.
/// Nothing here is fatal; an unexpected load failure yields an empty
/// failure map, the parent carries on with the other regions.
pub fn run_region_scan(engine: &dyn PolicyEngine, scan: &RegionScan) -> FailedPolicies {
    let raw = match std::fs::read(&scan.policies_file) {
        Ok(raw) => raw,
        Err(err) => {
            error!("cannot read policies file: {err}");
            return FailedPolicies::new();
        }
    };
    let descriptors: Vec<PolicyDescriptor> = match serde_json::from_slice(&raw) {
        Ok(descriptors) => descriptors,
        Err(err) => {
            error!("cannot parse policies file: {err}");
            return FailedPolicies::new();
        }
    };

    let load_global = scan.region == GLOBAL_REGION;
    let loader = PoliciesLoader::new(
        engine,
        scan.cloud,
        &scan.work_dir,
        BTreeSet::from([scan.region.clone()]),
        load_global,
    )
    .with_cache_period(120);

    debug!("loading policies");
    let policies = loader.load_from_policies(&descriptors);
    info!("{} policies were loaded", policies.len());
    let mut runner = Runner::new(scan.cloud, scan.deadline);
    info!("starting runner");
    runner.start(policies);
    info!("runner has finished");
    runner.failed()
}

/// Parent side: spawn the child image for one region and collect its
/// failures. The child is bounded by the job deadline plus a grace
/// period.
pub fn spawn_region_scan(
    executor_bin: &Path,
    scan: &RegionScan,
    env_frame: &[(String, String)],
) -> FailedPolicies {
    let args = scan.to_args();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let envs: Vec<(&str, &str)> = env_frame.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

    let mut command = ScanCommand::new(executor_bin, &args, &envs);
    let timeout = (scan.deadline - Utc::now()).num_seconds().max(0) as u64 + 120;

    let mut failed: Option<FailedPolicies> = None;
    let mut stdout = |line: String| {
        if let Some(decoded) = decode_failures(&line) {
            failed = Some(decoded);
        }
    };
    let mut stderr = |line: String| {
        info!("[{}] {line}", scan.region);
    };

    let result = command.exec_with_abort(&mut stdout, &mut stderr, &CommandKiller::from_timeout(Duration::from_secs(timeout)));
    if let Err(err) = result {
        error!("region {} scan process failed: {err}", scan.region);
    }
    failed.unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PolicyErrorType;
    use chrono::TimeZone;

    #[test]
    fn region_scan_args_round_trip() {
        let scan = RegionScan {
            cloud: Cloud::Aws,
            region: "eu-west-1".to_string(),
            policies_file: PathBuf::from("/tmp/policies.json"),
            work_dir: PathBuf::from("/tmp/work"),
            deadline: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let decoded = RegionScan::from_args(&scan.to_args()).unwrap();
        assert_eq!(decoded.region, scan.region);
        assert_eq!(decoded.cloud, scan.cloud);
        assert_eq!(decoded.deadline, scan.deadline);
    }

    #[test]
    fn failures_survive_the_pipe() {
        let mut failed = FailedPolicies::new();
        failed.insert(
            ("eu-west-1".to_string(), "r1".to_string()),
            PolicyFailure {
                error_type: PolicyErrorType::Access,
                message: Some("denied".to_string()),
                traceback: vec![],
            },
        );
        let decoded = decode_failures(&encode_failures(&failed)).unwrap();
        assert_eq!(decoded, failed);
    }

    #[test]
    fn garbage_lines_are_ignored() {
        assert!(decode_failures("some log line").is_none());
        assert_eq!(decode_failures("[]").unwrap(), FailedPolicies::new());
    }
}
