use std::path::PathBuf;
use std::time::Duration;

use crate::context::CallContext;
use crate::credentials::AwsCredentials;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_TTL_DAYS: u32 = 7;
pub const DEFAULT_FIRESTORE_DATABASE: &str = "(default)";
pub const DEFAULT_FIRESTORE_COLLECTION: &str = "secrets";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    /// Days until a newly stored secret expires.
    pub ttl_days: u32,
    /// Default deadline applied by [`StoreConfig::call_context`].
    /// Set via OTS_CALL_TIMEOUT_SECS. Default: none.
    pub call_timeout: Option<Duration>,
}

/// Exactly one backend pairing is active per process.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    Aws(AwsConfig),
    Gcp(GcpConfig),
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub s3_bucket: String,
    pub dynamo_table: String,
    pub region: String,
    /// Explicit keys. When unset, requests are signed with keys from the
    /// ambient provider chain (web identity, ECS task role, instance role).
    pub credentials: Option<AwsCredentials>,
    /// DynamoDB Local or another compatible endpoint.
    pub dynamo_endpoint: Option<String>,
    /// MinIO or another S3-compatible endpoint.
    pub s3_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GcpConfig {
    pub project_id: String,
    pub database: String,
    pub collection: String,
    pub gcs_bucket: String,
    pub emulator_host: Option<String>,
    pub access_token: Option<String>,
    /// Service account key file. Without it (and without a static token)
    /// Application Default Credentials apply.
    pub credentials_file: Option<PathBuf>,
}

impl StoreConfig {
    /// Retention window as a duration.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }

    /// Expiry (epoch seconds) for a secret created now.
    pub fn expiry_from_now(&self) -> i64 {
        crate::record::expiry_after(chrono::Utc::now(), self.retention())
    }

    pub fn call_context(&self) -> CallContext {
        match self.call_timeout {
            Some(timeout) => CallContext::with_timeout(timeout),
            None => CallContext::background(),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            BackendConfig::Aws(_) => "aws",
            BackendConfig::Gcp(_) => "gcp",
        }
    }

    /// Build from an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let aws = match (var("S3_BUCKET"), var("DYNAMO_TABLE")) {
            (Some(s3_bucket), Some(dynamo_table)) => Some(AwsConfig {
                s3_bucket,
                dynamo_table,
                region: var("AWS_REGION").unwrap_or_else(|| DEFAULT_REGION.into()),
                credentials: AwsCredentials::from_lookup(&var),
                dynamo_endpoint: var("DYNAMO_ENDPOINT"),
                s3_endpoint: var("S3_ENDPOINT"),
            }),
            _ => None,
        };

        let gcp = match (var("FIRESTORE_PROJECT_ID"), var("GCS_BUCKET")) {
            (Some(project_id), Some(gcs_bucket)) => Some(GcpConfig {
                project_id,
                database: var("FIRESTORE_DATABASE")
                    .unwrap_or_else(|| DEFAULT_FIRESTORE_DATABASE.into()),
                collection: var("FIRESTORE_COLLECTION")
                    .unwrap_or_else(|| DEFAULT_FIRESTORE_COLLECTION.into()),
                gcs_bucket,
                emulator_host: var("FIRESTORE_EMULATOR_HOST"),
                access_token: var("GOOGLE_OAUTH_ACCESS_TOKEN"),
                credentials_file: var("GOOGLE_APPLICATION_CREDENTIALS").map(PathBuf::from),
            }),
            _ => None,
        };

        let backend = match (aws, gcp) {
            (Some(aws), Some(_)) => {
                tracing::warn!("both AWS and GCP storage are configured; using AWS");
                BackendConfig::Aws(aws)
            }
            (Some(aws), None) => BackendConfig::Aws(aws),
            (None, Some(gcp)) => BackendConfig::Gcp(gcp),
            (None, None) => anyhow::bail!(
                "missing required ENV vars - must provide either AWS (S3_BUCKET + DYNAMO_TABLE) \
                 or Google Cloud (FIRESTORE_PROJECT_ID + GCS_BUCKET) configuration"
            ),
        };

        let ttl_days = match var("TTL_DAYS") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(days) if days > 0 => days,
                _ => anyhow::bail!("TTL_DAYS must be a positive whole number of days, got '{}'", raw),
            },
            None => DEFAULT_TTL_DAYS,
        };

        let call_timeout = match var("OTS_CALL_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Some(Duration::from_secs(secs)),
                _ => anyhow::bail!("OTS_CALL_TIMEOUT_SECS must be a positive number of seconds, got '{}'", raw),
            },
            None => None,
        };

        Ok(Self {
            backend,
            ttl_days,
            call_timeout,
        })
    }
}

pub fn load() -> anyhow::Result<StoreConfig> {
    dotenvy::dotenv().ok();
    StoreConfig::from_lookup(|key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_aws_pairing_with_defaults() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("S3_BUCKET", "ots-files"),
            ("DYNAMO_TABLE", "ots-secrets"),
        ]))
        .unwrap();

        let BackendConfig::Aws(aws) = &cfg.backend else {
            panic!("expected AWS pairing, got {:?}", cfg.backend);
        };
        assert_eq!(aws.region, "us-east-1");
        assert!(aws.credentials.is_none());
        assert_eq!(cfg.ttl_days, 7);
        assert_eq!(cfg.retention(), chrono::Duration::days(7));
        assert!(cfg.call_timeout.is_none());
        assert_eq!(cfg.backend_name(), "aws");
    }

    #[test]
    fn test_gcp_pairing_with_overrides() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("FIRESTORE_PROJECT_ID", "proj"),
            ("GCS_BUCKET", "ots-files"),
            ("FIRESTORE_DATABASE", "ots"),
            ("FIRESTORE_EMULATOR_HOST", "localhost:8080"),
            ("TTL_DAYS", "3"),
            ("OTS_CALL_TIMEOUT_SECS", "15"),
        ]))
        .unwrap();

        let BackendConfig::Gcp(gcp) = &cfg.backend else {
            panic!("expected GCP pairing, got {:?}", cfg.backend);
        };
        assert_eq!(gcp.database, "ots");
        assert_eq!(gcp.collection, "secrets");
        assert_eq!(gcp.emulator_host.as_deref(), Some("localhost:8080"));
        assert!(gcp.credentials_file.is_none());
        assert_eq!(cfg.ttl_days, 3);
        assert_eq!(cfg.call_timeout, Some(Duration::from_secs(15)));
        assert!(cfg.call_context().deadline().is_some());
    }

    #[test]
    fn test_aws_wins_when_both_configured() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("S3_BUCKET", "b"),
            ("DYNAMO_TABLE", "t"),
            ("FIRESTORE_PROJECT_ID", "p"),
            ("GCS_BUCKET", "g"),
        ]))
        .unwrap();
        assert!(matches!(cfg.backend, BackendConfig::Aws(_)));
    }

    #[test]
    fn test_partial_configuration_is_rejected() {
        let err = StoreConfig::from_lookup(lookup(&[("S3_BUCKET", "b"), ("GCS_BUCKET", "g")]))
            .unwrap_err();
        assert!(err.to_string().contains("missing required ENV vars"));

        assert!(StoreConfig::from_lookup(lookup(&[("DYNAMO_TABLE", "  ")])).is_err());
    }

    #[test]
    fn test_malformed_ttl_is_an_error() {
        let base = [("S3_BUCKET", "b"), ("DYNAMO_TABLE", "t")];
        for bad in ["seven", "0", "-1"] {
            let mut pairs = base.to_vec();
            pairs.push(("TTL_DAYS", bad));
            assert!(StoreConfig::from_lookup(lookup(&pairs)).is_err(), "accepted TTL_DAYS={}", bad);
        }
    }

    #[test]
    fn test_gcp_key_file_is_picked_up() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("FIRESTORE_PROJECT_ID", "proj"),
            ("GCS_BUCKET", "ots-files"),
            ("GOOGLE_APPLICATION_CREDENTIALS", "/etc/ots/sa.json"),
        ]))
        .unwrap();
        let BackendConfig::Gcp(gcp) = cfg.backend else {
            panic!("expected GCP pairing");
        };
        assert_eq!(gcp.credentials_file, Some(PathBuf::from("/etc/ots/sa.json")));
    }

    #[test]
    fn test_credentials_are_picked_up() {
        let cfg = StoreConfig::from_lookup(lookup(&[
            ("S3_BUCKET", "b"),
            ("DYNAMO_TABLE", "t"),
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
            ("AWS_REGION", "eu-west-1"),
        ]))
        .unwrap();
        let BackendConfig::Aws(aws) = cfg.backend else {
            panic!("expected AWS pairing");
        };
        assert_eq!(aws.region, "eu-west-1");
        assert_eq!(aws.credentials.unwrap().access_key_id, "AKID");
    }
}
