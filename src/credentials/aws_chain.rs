//! Where DynamoDB signing keys come from.
//!
//! Explicit `AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY` are used as given.
//! Otherwise the keys come from object_store's AWS provider chain, the same
//! one the S3 blob store authenticates with: web identity (EKS/IRSA), the ECS
//! container endpoint, then the EC2 instance metadata service. Temporary
//! credentials are cached by the provider and refreshed before they expire.

use std::sync::Arc;

use anyhow::Context;
use object_store::aws::{AmazonS3Builder, AwsCredential, AwsCredentialProvider};
use object_store::CredentialProvider;

use super::AwsCredentials;

#[derive(Clone)]
pub enum AwsCredentialSource {
    Static(AwsCredentials),
    Provider(AwsCredentialProvider),
}

impl std::fmt::Debug for AwsCredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(creds) => f.debug_tuple("Static").field(creds).finish(),
            Self::Provider(_) => f.write_str("Provider"),
        }
    }
}

impl From<AwsCredentials> for AwsCredentialSource {
    fn from(creds: AwsCredentials) -> Self {
        Self::Static(creds)
    }
}

impl AwsCredentialSource {
    /// The ambient chain for `region`. Nothing is fetched until the first
    /// request is signed.
    pub fn default_chain(region: &str, bucket: &str) -> anyhow::Result<Self> {
        let s3 = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket)
            .build()
            .context("failed to resolve the AWS credential provider chain")?;
        Ok(Self::Provider(Arc::clone(s3.credentials())))
    }

    pub fn provider(provider: impl CredentialProvider<Credential = AwsCredential> + 'static) -> Self {
        Self::Provider(Arc::new(provider))
    }

    /// Keys to sign the next request with.
    pub async fn resolve(&self) -> anyhow::Result<AwsCredentials> {
        match self {
            Self::Static(creds) => Ok(creds.clone()),
            Self::Provider(provider) => {
                let credential = provider
                    .get_credential()
                    .await
                    .context("no AWS credentials available from the provider chain")?;
                Ok(AwsCredentials {
                    access_key_id: credential.key_id.clone(),
                    secret_access_key: credential.secret_key.clone(),
                    session_token: credential.token.clone(),
                })
            }
        }
    }
}
