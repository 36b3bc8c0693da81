//! Bearer tokens for the Firestore REST API.
//!
//! Sources, chosen from configuration:
//! - `Emulator`: the Firestore emulator accepts unauthenticated requests.
//! - `Static`: a pre-minted token (`GOOGLE_OAUTH_ACCESS_TOKEN`).
//! - `Google`: a yup-oauth2 authenticator, either for an explicit service
//!   account key or for Application Default Credentials (the key file named
//!   by `GOOGLE_APPLICATION_CREDENTIALS`, else the GCE/Cloud Run/GKE metadata
//!   server). Tokens are cached and refreshed by the authenticator.

use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::OnceCell;
use yup_oauth2::authenticator::{ApplicationDefaultCredentialsTypes, DefaultAuthenticator};
use yup_oauth2::{
    ApplicationDefaultCredentialsAuthenticator, ApplicationDefaultCredentialsFlowOpts,
    ServiceAccountAuthenticator, ServiceAccountKey,
};

pub const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";

pub enum TokenSource {
    Emulator,
    Static(String),
    Google(GoogleAuth),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emulator => f.write_str("Emulator"),
            Self::Static(_) => f.write_str("Static([REDACTED])"),
            Self::Google(auth) => write!(f, "Google({:?})", auth.credentials),
        }
    }
}

impl TokenSource {
    /// Application Default Credentials.
    pub fn application_default() -> Self {
        Self::Google(GoogleAuth::new(GoogleCredentials::ApplicationDefault))
    }

    /// A service account key file, read on first use.
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self::Google(GoogleAuth::new(GoogleCredentials::KeyFile(path.into())))
    }

    pub fn service_account(key: ServiceAccountKey) -> Self {
        Self::Google(GoogleAuth::new(GoogleCredentials::Key(Box::new(key))))
    }

    /// The `Authorization` value to send, if any.
    pub async fn bearer(&self) -> anyhow::Result<Option<String>> {
        match self {
            Self::Emulator => Ok(None),
            Self::Static(token) => Ok(Some(format!("Bearer {}", token))),
            Self::Google(auth) => {
                let token = auth.token().await?;
                Ok(Some(format!("Bearer {}", token)))
            }
        }
    }
}

enum GoogleCredentials {
    ApplicationDefault,
    KeyFile(PathBuf),
    Key(Box<ServiceAccountKey>),
}

impl std::fmt::Debug for GoogleCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApplicationDefault => f.write_str("ApplicationDefault"),
            Self::KeyFile(path) => write!(f, "KeyFile({})", path.display()),
            Self::Key(key) => write!(f, "ServiceAccount({})", key.client_email),
        }
    }
}

/// Authenticator built lazily so store construction stays synchronous.
pub struct GoogleAuth {
    credentials: GoogleCredentials,
    authenticator: OnceCell<DefaultAuthenticator>,
}

impl GoogleAuth {
    fn new(credentials: GoogleCredentials) -> Self {
        Self {
            credentials,
            authenticator: OnceCell::new(),
        }
    }

    async fn build(&self) -> anyhow::Result<DefaultAuthenticator> {
        let auth = match &self.credentials {
            GoogleCredentials::ApplicationDefault => {
                let opts = ApplicationDefaultCredentialsFlowOpts::default();
                match ApplicationDefaultCredentialsAuthenticator::builder(opts).await {
                    ApplicationDefaultCredentialsTypes::ServiceAccount(builder) => builder.build().await,
                    ApplicationDefaultCredentialsTypes::InstanceMetadata(builder) => builder.build().await,
                }
                .context("failed to build GCP application default authenticator")?
            }
            GoogleCredentials::KeyFile(path) => {
                let key = yup_oauth2::read_service_account_key(path)
                    .await
                    .with_context(|| format!("failed to read GCP credentials from {}", path.display()))?;
                ServiceAccountAuthenticator::builder(key)
                    .build()
                    .await
                    .context("failed to build GCP service account authenticator")?
            }
            GoogleCredentials::Key(key) => ServiceAccountAuthenticator::builder(key.as_ref().clone())
                .build()
                .await
                .context("failed to build GCP service account authenticator")?,
        };
        tracing::debug!(credentials = ?self.credentials, "GCP authenticator ready");
        Ok(auth)
    }

    async fn token(&self) -> anyhow::Result<String> {
        let auth = self.authenticator.get_or_try_init(|| self.build()).await?;
        let token = auth
            .token(&[DATASTORE_SCOPE])
            .await
            .context("failed to obtain a GCP access token")?;
        token
            .token()
            .map(str::to_owned)
            .context("GCP token response carried no access token")
    }
}
