use std::path::PathBuf;

pub const DEFAULT_TUTOR_FALLBACK: &str = "tutor@kalams.org";

const DEFAULT_CENTERS: &[&str] = &["Andheri", "Dharavi", "Govandi", "Kurla", "Malad"];

/// Credentials and endpoints for the document store.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub project_id: Option<String>,
    pub api_key: Option<String>,
    pub auth_domain: Option<String>,
    pub storage_bucket: Option<String>,
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedStore {
    pub project_id: String,
    pub api_key: String,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub centers: Vec<String>,
    /// Assignee addresses that every tutor matches in addition to their own.
    pub tutor_fallback_emails: Vec<String>,
    /// Newest attendance history entries kept per student; `None` keeps all.
    pub history_retention: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            centers: DEFAULT_CENTERS.iter().map(|s| s.to_string()).collect(),
            tutor_fallback_emails: vec![DEFAULT_TUTOR_FALLBACK.to_string()],
            history_retention: None,
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut cfg = AppConfig::default();
        cfg.store = StoreConfig {
            project_id: env_nonempty("KALAMS_PROJECT_ID"),
            api_key: env_nonempty("KALAMS_API_KEY"),
            auth_domain: env_nonempty("KALAMS_AUTH_DOMAIN"),
            storage_bucket: env_nonempty("KALAMS_STORAGE_BUCKET"),
            data_dir: env_nonempty("KALAMS_DATA_DIR").map(PathBuf::from),
        };
        if let Some(raw) = env_nonempty("KALAMS_CENTERS") {
            cfg.centers = split_list(&raw);
        }
        // An explicitly empty value disables the fallback match entirely.
        if let Ok(raw) = std::env::var("KALAMS_TUTOR_FALLBACK_EMAILS") {
            cfg.tutor_fallback_emails = split_list(&raw);
        }
        if let Some(raw) = env_nonempty("KALAMS_HISTORY_RETENTION") {
            let n: usize = raw.parse().map_err(|_| {
                anyhow::anyhow!("KALAMS_HISTORY_RETENTION must be a non-negative integer, got {raw:?}")
            })?;
            cfg.history_retention = if n == 0 { None } else { Some(n) };
        }
        Ok(cfg)
    }

    pub fn is_known_center(&self, center: &str) -> bool {
        self.centers.iter().any(|c| c == center)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingConfig(pub Vec<&'static str>);

impl StoreConfig {
    /// Overlay request-supplied values on top of the environment.
    pub fn overlay(&self, params: &serde_json::Value) -> StoreConfig {
        let pick = |key: &str| {
            params
                .get(key)
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        StoreConfig {
            project_id: pick("projectId").or_else(|| self.project_id.clone()),
            api_key: pick("apiKey").or_else(|| self.api_key.clone()),
            auth_domain: pick("authDomain").or_else(|| self.auth_domain.clone()),
            storage_bucket: pick("storageBucket").or_else(|| self.storage_bucket.clone()),
            data_dir: pick("dataDir")
                .map(PathBuf::from)
                .or_else(|| self.data_dir.clone()),
        }
    }

    pub fn resolve(&self) -> Result<ResolvedStore, MissingConfig> {
        let mut missing = Vec::new();
        if self.project_id.is_none() {
            missing.push("KALAMS_PROJECT_ID");
        }
        if self.api_key.is_none() {
            missing.push("KALAMS_API_KEY");
        }
        if self.data_dir.is_none() {
            missing.push("KALAMS_DATA_DIR");
        }
        match (&self.project_id, &self.api_key, &self.data_dir) {
            (Some(project_id), Some(api_key), Some(data_dir)) => Ok(ResolvedStore {
                project_id: project_id.clone(),
                api_key: api_key.clone(),
                data_dir: data_dir.clone(),
            }),
            _ => Err(MissingConfig(missing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_reports_every_missing_credential() {
        let cfg = StoreConfig::default();
        let missing = cfg.resolve().expect_err("nothing configured");
        assert_eq!(
            missing.0,
            vec!["KALAMS_PROJECT_ID", "KALAMS_API_KEY", "KALAMS_DATA_DIR"]
        );
    }

    #[test]
    fn request_params_override_environment_values() {
        let env = StoreConfig {
            project_id: Some("env-project".into()),
            api_key: Some("env-key".into()),
            data_dir: Some(PathBuf::from("/tmp/env")),
            ..Default::default()
        };
        let merged = env.overlay(&json!({ "projectId": "req-project", "apiKey": "  " }));
        let resolved = merged.resolve().expect("resolved");
        assert_eq!(resolved.project_id, "req-project");
        assert_eq!(resolved.api_key, "env-key");
        assert_eq!(resolved.data_dir, PathBuf::from("/tmp/env"));
    }

    #[test]
    fn split_list_trims_and_drops_blanks() {
        assert_eq!(split_list(" a@x.org, ,b@x.org "), vec!["a@x.org", "b@x.org"]);
        assert!(split_list("").is_empty());
    }
}
