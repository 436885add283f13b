use crate::constants::{
    AWS_ACCESS_DENIED_ERROR_CODES, AWS_INVALID_CREDENTIALS_ERROR_CODES, AZURE_INVALID_CREDENTIALS_ERROR_CODES,
};
use crate::errors::PolicyErrorType;
use crate::models::Cloud;
use crate::policy::{Policy, PolicyExecutionError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const TIME_EXCEEDED_MESSAGE: &str = "Job time exceeded the maximum possible execution time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyFailure {
    pub error_type: PolicyErrorType,
    pub message: Option<String>,
    #[serde(default)]
    pub traceback: Vec<String>,
}

/// (region, policy) -> failure
pub type FailedPolicies = BTreeMap<(String, String), PolicyFailure>;

/// Executes a prepared policy list against one region. Invalid credentials
/// are terminal: once seen, every remaining policy is recorded with the
/// same failure instead of being invoked. Crossing the deadline downgrades
/// the rest to SKIPPED.
pub struct Runner {
    cloud: Cloud,
    deadline: DateTime<Utc>,
    failed: FailedPolicies,
    is_ongoing: bool,
    carry_error_type: PolicyErrorType,
    carry_message: Option<String>,
}

impl Runner {
    pub fn new(cloud: Cloud, deadline: DateTime<Utc>) -> Self {
        Runner {
            cloud,
            deadline,
            failed: FailedPolicies::new(),
            is_ongoing: false,
            carry_error_type: PolicyErrorType::Skipped,
            carry_message: None,
        }
    }

    pub fn start(&mut self, policies: Vec<Policy>) {
        self.is_ongoing = true;
        for policy in policies {
            self.handle_policy(&policy);
        }
        self.is_ongoing = false;
    }

    pub fn failed(self) -> FailedPolicies {
        self.failed
    }

    fn add_failed(
        &mut self,
        region: String,
        policy: &str,
        error_type: PolicyErrorType,
        message: Option<String>,
        traceback: Vec<String>,
    ) {
        self.failed.insert(
            (region, policy.to_string()),
            PolicyFailure {
                error_type,
                message,
                traceback,
            },
        );
    }

    /// Deadline and carry-over gate. `None` means the policy was recorded
    /// without being invoked.
    fn call_policy(&mut self, policy: &Policy) -> Option<Result<(), PolicyExecutionError>> {
        if Utc::now() >= self.deadline {
            if self.is_ongoing {
                warn!("job time threshold has been exceeded, all the consequent rules will be skipped");
            }
            self.is_ongoing = false;
            self.carry_error_type = PolicyErrorType::Skipped;
            self.carry_message = Some(TIME_EXCEEDED_MESSAGE.to_string());
        }
        if !self.is_ongoing {
            self.add_failed(
                policy.effective_region(),
                &policy.name,
                self.carry_error_type,
                self.carry_message.clone(),
                vec![],
            );
            return None;
        }
        Some(policy.run())
    }

    fn stop_ongoing(&mut self, error_type: PolicyErrorType, message: Option<String>) {
        self.is_ongoing = false;
        self.carry_error_type = error_type;
        self.carry_message = message;
    }

    fn handle_policy(&mut self, policy: &Policy) {
        let (name, region) = (policy.name.clone(), policy.effective_region());
        let error = match self.call_policy(policy) {
            None | Some(Ok(())) => return,
            Some(Err(error)) => error,
        };
        let traceback = vec![error.to_string()];

        match (self.cloud, &error) {
            (Cloud::Aws, PolicyExecutionError::AwsClient { code, message }) => {
                if AWS_ACCESS_DENIED_ERROR_CODES.contains(&code.as_str()) {
                    warn!("policy '{name}' is skipped. Reason: '{message}'");
                    self.add_failed(region, &name, PolicyErrorType::Access, Some(message.clone()), vec![]);
                } else if AWS_INVALID_CREDENTIALS_ERROR_CODES.contains(&code.as_str()) {
                    warn!("policy '{name}' is skipped due to invalid credentials. All the subsequent rules will be skipped");
                    self.add_failed(
                        region,
                        &name,
                        PolicyErrorType::Credentials,
                        Some(message.clone()),
                        vec![],
                    );
                    self.stop_ongoing(PolicyErrorType::Credentials, Some(message.clone()));
                } else {
                    warn!("policy '{name}' has failed. Client error occurred. Code: '{code}'. Reason: {message}");
                    self.add_failed(region, &name, PolicyErrorType::Client, Some(message.clone()), traceback);
                }
            }
            (Cloud::Azure, PolicyExecutionError::AzureCloud { code, message }) => {
                if AZURE_INVALID_CREDENTIALS_ERROR_CODES.contains(&code.as_str()) {
                    warn!("policy '{name}' is skipped due to invalid credentials. All the subsequent rules will be skipped");
                    self.add_failed(
                        region,
                        &name,
                        PolicyErrorType::Credentials,
                        Some(message.clone()),
                        vec![],
                    );
                    self.stop_ongoing(PolicyErrorType::Credentials, Some(message.clone()));
                } else {
                    warn!("policy '{name}' has failed. Client error occurred. Code: '{code}'. Reason: {message}");
                    self.add_failed(region, &name, PolicyErrorType::Client, Some(message.clone()), traceback);
                }
            }
            (Cloud::Google, PolicyExecutionError::GcpAuth { message }) => {
                warn!("policy '{name}' is skipped due to invalid credentials. All the subsequent rules will be skipped");
                self.add_failed(
                    region,
                    &name,
                    PolicyErrorType::Credentials,
                    Some(message.clone()),
                    vec![],
                );
                self.stop_ongoing(PolicyErrorType::Credentials, Some(message.clone()));
            }
            (Cloud::Google, PolicyExecutionError::GcpHttp { status: 403, reason }) => {
                self.add_failed(region, &name, PolicyErrorType::Access, Some(reason.clone()), vec![]);
            }
            (Cloud::Google, PolicyExecutionError::GcpHttp { reason, .. }) => {
                self.add_failed(region, &name, PolicyErrorType::Client, Some(reason.clone()), traceback);
            }
            _ => {
                error!("policy {name} has failed with unexpected error: {error}");
                self.add_failed(
                    region,
                    &name,
                    PolicyErrorType::Internal,
                    Some(error.to_string()),
                    traceback,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{PolicyExec, PolicyRunContext};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedExec {
        invocations: Arc<AtomicUsize>,
        outcome: Mutex<Option<PolicyExecutionError>>,
    }

    impl PolicyExec for ScriptedExec {
        fn run(&self, _ctx: &PolicyRunContext) -> Result<(), PolicyExecutionError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            match self.outcome.lock().unwrap().take() {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }

    fn counted_policy(invocations: &Arc<AtomicUsize>, name: &str, outcome: Option<PolicyExecutionError>) -> Policy {
        let mut policy = Policy::new(
            name,
            "aws",
            "aws.ec2",
            false,
            None,
            Arc::new(ScriptedExec {
                invocations: invocations.clone(),
                outcome: Mutex::new(outcome),
            }),
        );
        policy.region = "eu-west-1".to_string();
        policy
    }

    fn policy(name: &str, outcome: Option<PolicyExecutionError>) -> Policy {
        counted_policy(&Arc::new(AtomicUsize::new(0)), name, outcome)
    }

    fn far_deadline() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2999, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn invalid_credentials_are_terminal() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut runner = Runner::new(Cloud::Aws, far_deadline());
        runner.start(vec![
            counted_policy(&invocations, "p1", None),
            counted_policy(
                &invocations,
                "p2",
                Some(PolicyExecutionError::AwsClient {
                    code: "InvalidClientTokenId".to_string(),
                    message: "token expired".to_string(),
                }),
            ),
            counted_policy(&invocations, "p3", None),
            counted_policy(&invocations, "p4", None),
        ]);
        let failed = runner.failed();

        // p1 invoked and fine, p2 invoked and failed, p3/p4 never invoked
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(failed.len(), 3);
        for name in ["p2", "p3", "p4"] {
            let failure = &failed[&("eu-west-1".to_string(), name.to_string())];
            assert_eq!(failure.error_type, PolicyErrorType::Credentials);
            assert_eq!(failure.message.as_deref(), Some("token expired"));
        }
    }

    struct SleepyExec(std::time::Duration);

    impl PolicyExec for SleepyExec {
        fn run(&self, _ctx: &PolicyRunContext) -> Result<(), PolicyExecutionError> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    fn sleepy_policy(name: &str, millis: u64) -> Policy {
        let mut policy = Policy::new(
            name,
            "aws",
            "aws.ec2",
            false,
            None,
            Arc::new(SleepyExec(std::time::Duration::from_millis(millis))),
        );
        policy.region = "eu-west-1".to_string();
        policy
    }

    #[test]
    fn deadline_crossing_mid_scan_skips_the_tail() {
        let mut runner = Runner::new(Cloud::Aws, Utc::now() + chrono::Duration::milliseconds(1000));
        runner.start(vec![
            sleepy_policy("p1", 600),
            sleepy_policy("p2", 600),
            sleepy_policy("p3", 0),
            sleepy_policy("p4", 0),
            sleepy_policy("p5", 0),
        ]);
        let failed = runner.failed();

        assert_eq!(failed.len(), 3);
        for name in ["p3", "p4", "p5"] {
            let failure = &failed[&("eu-west-1".to_string(), name.to_string())];
            assert_eq!(failure.error_type, PolicyErrorType::Skipped);
            assert_eq!(failure.message.as_deref(), Some(TIME_EXCEEDED_MESSAGE));
        }
    }

    #[test]
    fn deadline_crossing_skips_the_rest() {
        let mut runner = Runner::new(Cloud::Aws, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap());
        runner.start(vec![policy("p1", None), policy("p2", None)]);
        let failed = runner.failed();
        assert_eq!(failed.len(), 2);
        for failure in failed.values() {
            assert_eq!(failure.error_type, PolicyErrorType::Skipped);
            assert_eq!(failure.message.as_deref(), Some(TIME_EXCEEDED_MESSAGE));
        }
    }

    #[test]
    fn access_denied_does_not_stop_the_run() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let mut runner = Runner::new(Cloud::Aws, far_deadline());
        runner.start(vec![
            counted_policy(
                &invocations,
                "p1",
                Some(PolicyExecutionError::AwsClient {
                    code: "AccessDenied".to_string(),
                    message: "no ec2:Describe".to_string(),
                }),
            ),
            counted_policy(&invocations, "p2", None),
        ]);
        let failed = runner.failed();
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[&("eu-west-1".to_string(), "p1".to_string())].error_type,
            PolicyErrorType::Access
        );
    }

    #[test]
    fn gcp_403_is_access_other_http_is_client() {
        let mut gcp_policy = Policy::new(
            "g1",
            "gcp",
            "gcp.instance",
            false,
            None,
            Arc::new(ScriptedExec {
                invocations: Arc::new(AtomicUsize::new(0)),
                outcome: Mutex::new(Some(PolicyExecutionError::GcpHttp {
                    status: 403,
                    reason: "forbidden".to_string(),
                })),
            }),
        );
        gcp_policy.region = "us-central1".to_string();
        let mut runner = Runner::new(Cloud::Google, far_deadline());
        runner.start(vec![gcp_policy]);
        let failed = runner.failed();
        assert_eq!(
            failed[&(crate::constants::GLOBAL_REGION.to_string(), "g1".to_string())].error_type,
            PolicyErrorType::Access
        );
    }

    #[test]
    fn kubernetes_errors_are_internal() {
        let mut k8s_policy = Policy::new(
            "k1",
            "k8s",
            "k8s.pod",
            false,
            None,
            Arc::new(ScriptedExec {
                invocations: Arc::new(AtomicUsize::new(0)),
                outcome: Mutex::new(Some(PolicyExecutionError::Other {
                    message: "api server unreachable".to_string(),
                })),
            }),
        );
        k8s_policy.region = "global".to_string();
        let mut runner = Runner::new(Cloud::Kubernetes, far_deadline());
        runner.start(vec![k8s_policy]);
        let failed = runner.failed();
        assert_eq!(failed.values().next().unwrap().error_type, PolicyErrorType::Internal);
    }
}
