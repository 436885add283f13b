use serde_yaml::{Mapping, Value};
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, thiserror::Error)]
pub enum KubeconfigError {
    #[error("invalid kubeconfig: {raw_error_message}")]
    Invalid { raw_error_message: String },

    #[error("cannot materialize kubeconfig: {raw_error_message}")]
    CannotMaterialize { raw_error_message: String },
}

/// Kubeconfig manipulated at the document level: the scan engine is the
/// one talking to the cluster, this side only assembles the file it reads.
pub struct Kubeconfig {
    doc: Mapping,
}

fn entry_name(value: &Value) -> Option<&str> {
    value.get("name").and_then(Value::as_str)
}

impl Kubeconfig {
    pub fn from_yaml(raw: &str) -> Result<Kubeconfig, KubeconfigError> {
        let doc: Value = serde_yaml::from_str(raw).map_err(|err| KubeconfigError::Invalid {
            raw_error_message: err.to_string(),
        })?;
        let doc = match doc {
            Value::Mapping(doc) => doc,
            _ => {
                return Err(KubeconfigError::Invalid {
                    raw_error_message: "document is not a mapping".to_string(),
                });
            }
        };
        if !doc.contains_key("clusters") {
            return Err(KubeconfigError::Invalid {
                raw_error_message: "document carries no clusters".to_string(),
            });
        }
        Ok(Kubeconfig { doc })
    }

    /// A fresh kubeconfig around one cluster endpoint and a bearer token,
    /// the shape used for EKS token access.
    pub fn for_token(endpoint: &str, ca_data: &str, token: &str, cluster_name: &str) -> Kubeconfig {
        let doc = serde_yaml::from_value::<Value>(
            serde_yaml::to_value(serde_json::json!({
                "apiVersion": "v1",
                "kind": "Config",
                "clusters": [{
                    "name": cluster_name,
                    "cluster": {"server": endpoint, "certificate-authority-data": ca_data},
                }],
                "users": [{
                    "name": "token-user",
                    "user": {"token": token},
                }],
                "contexts": [{
                    "name": "token-context",
                    "context": {"cluster": cluster_name, "user": "token-user"},
                }],
                "current-context": "token-context",
            }))
            .expect("static kubeconfig document is serializable"),
        )
        .expect("static kubeconfig document is well formed");
        match doc {
            Value::Mapping(doc) => Kubeconfig { doc },
            _ => unreachable!("document is built as a mapping"),
        }
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.doc
            .get("clusters")
            .and_then(Value::as_sequence)
            .map(|clusters| {
                clusters
                    .iter()
                    .filter_map(entry_name)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_entry(&mut self, section: &str, entry: Value) {
        let section_key = Value::String(section.to_string());
        match self.doc.get_mut(&section_key).and_then(Value::as_sequence_mut) {
            Some(entries) => entries.push(entry),
            None => {
                self.doc.insert(section_key, Value::Sequence(vec![entry]));
            }
        }
    }

    pub fn add_user(&mut self, name: &str, token: &str) {
        let entry = serde_yaml::to_value(serde_json::json!({
            "name": name,
            "user": {"token": token},
        }))
        .expect("user entry is serializable");
        self.push_entry("users", entry);
    }

    pub fn add_context(&mut self, name: &str, cluster: &str, user: &str) {
        let entry = serde_yaml::to_value(serde_json::json!({
            "name": name,
            "context": {"cluster": cluster, "user": user},
        }))
        .expect("context entry is serializable");
        self.push_entry("contexts", entry);
    }

    pub fn set_current_context(&mut self, name: &str) {
        self.doc.insert(
            Value::String("current-context".to_string()),
            Value::String(name.to_string()),
        );
    }

    pub fn to_yaml(&self) -> Result<String, KubeconfigError> {
        serde_yaml::to_string(&self.doc).map_err(|err| KubeconfigError::CannotMaterialize {
            raw_error_message: err.to_string(),
        })
    }

    /// Writes the document to a temp file whose lifetime bounds the scan;
    /// dropping the handle removes the file.
    pub fn to_temp_file(&self) -> Result<NamedTempFile, KubeconfigError> {
        let cannot = |raw_error_message: String| KubeconfigError::CannotMaterialize { raw_error_message };
        let mut file = NamedTempFile::new().map_err(|e| cannot(e.to_string()))?;
        file.write_all(self.to_yaml()?.as_bytes()).map_err(|e| cannot(e.to_string()))?;
        file.flush().map_err(|e| cannot(e.to_string()))?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: prod-cluster
    cluster:
      server: https://10.0.0.1
current-context: old-context
contexts:
  - name: old-context
    context:
      cluster: prod-cluster
      user: old-user
users:
  - name: old-user
    user:
      client-certificate-data: abc
"#;

    #[test]
    fn merges_token_user_and_context() {
        let mut config = Kubeconfig::from_yaml(BASE).unwrap();
        assert_eq!(config.cluster_names(), vec!["prod-cluster".to_string()]);

        config.add_user("user-1", "tok");
        config.add_context("context-1", "prod-cluster", "user-1");
        config.set_current_context("context-1");

        let rendered = config.to_yaml().unwrap();
        let reparsed = Kubeconfig::from_yaml(&rendered).unwrap();
        assert_eq!(
            reparsed.doc.get("current-context").and_then(Value::as_str),
            Some("context-1")
        );
        assert!(rendered.contains("tok"));
        assert!(rendered.contains("old-user"), "existing entries survive the merge");
    }

    #[test]
    fn token_config_points_at_the_cluster() {
        let config = Kubeconfig::for_token("https://eks.example", "Y2E=", "k8s-aws-v1.abc", "prod");
        assert_eq!(config.cluster_names(), vec!["prod".to_string()]);
        let rendered = config.to_yaml().unwrap();
        assert!(rendered.contains("https://eks.example"));
        assert!(rendered.contains("k8s-aws-v1.abc"));
    }

    #[test]
    fn rejects_documents_without_clusters() {
        assert!(Kubeconfig::from_yaml("apiVersion: v1\nkind: Config\n").is_err());
        assert!(Kubeconfig::from_yaml("- not\n- a\n- mapping\n").is_err());
    }

    #[test]
    fn temp_file_holds_the_document() {
        let config = Kubeconfig::for_token("https://eks.example", "Y2E=", "tok", "prod");
        let file = config.to_temp_file().unwrap();
        let written = std::fs::read_to_string(file.path()).unwrap();
        assert!(written.contains("https://eks.example"));
    }
}
