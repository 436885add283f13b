use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub mod job;
pub mod license;
pub mod platform;
pub mod regions;
pub mod rule;
pub mod ruleset;
pub mod scheduled_job;
pub mod tenant;

/// Scan domain: the tenant's cloud, or KUBERNETES for platform scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cloud {
    Aws,
    Azure,
    Google,
    Kubernetes,
}

impl Cloud {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cloud::Aws => "AWS",
            Cloud::Azure => "AZURE",
            Cloud::Google => "GOOGLE",
            Cloud::Kubernetes => "KUBERNETES",
        }
    }
}

impl Display for Cloud {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cloud {
    type Err = String;

    // "GCP" is the obsolete alias for GOOGLE, still seen on the wire
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AWS" => Ok(Cloud::Aws),
            "AZURE" => Ok(Cloud::Azure),
            "GOOGLE" | "GCP" => Ok(Cloud::Google),
            "KUBERNETES" | "K8S" => Ok(Cloud::Kubernetes),
            _ => Err(format!("unknown cloud `{s}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Submitted,
    Pending,
    Runnable,
    Starting,
    Running,
    Failed,
    Succeeded,
}

impl JobStatus {
    /// Terminal statuses cannot be transitioned out of.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}
