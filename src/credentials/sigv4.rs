// ═══════════════════════════════════════════════════════════════
// AWS Signature Version 4 (SigV4) Signing
// ═══════════════════════════════════════════════════════════════
//
// Signs DynamoDB JSON-protocol requests. Every header present in the
// map at signing time is part of the signature, so callers add
// content-type and x-amz-target before signing.
//
// Reference: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_aws-signing.html

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Static AWS credentials. Secret parts are never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Read `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
    /// `AWS_SESSION_TOKEN` through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let access_key_id = lookup("AWS_ACCESS_KEY_ID").filter(|v| !v.is_empty())?;
        let secret_access_key = lookup("AWS_SECRET_ACCESS_KEY").filter(|v| !v.is_empty())?;
        Some(Self {
            access_key_id,
            secret_access_key,
            session_token: lookup("AWS_SESSION_TOKEN").filter(|v| !v.is_empty()),
        })
    }
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// SHA-256 hash of data, returned as lowercase hex string.
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], msg: &[u8]) -> anyhow::Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("SigV4: invalid HMAC key: {}", e))?;
    mac.update(msg);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// key = HMAC("AWS4" + secret, date) → HMAC(_, region) → HMAC(_, service) → HMAC(_, "aws4_request")
fn derive_signing_key(
    secret: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> anyhow::Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// Sign a request at the current time. See [`sign_request_at`].
pub fn sign_request(
    method: &str,
    url: &str,
    headers: &mut HeaderMap,
    body: &[u8],
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
) -> anyhow::Result<()> {
    sign_request_at(Utc::now(), method, url, headers, body, credentials, region, service)
}

/// Sign a request using AWS Signature Version 4 and inject the
/// `Authorization`, `X-Amz-Date`, `X-Amz-Content-Sha256` (and, for
/// temporary credentials, `X-Amz-Security-Token`) headers.
#[allow(clippy::too_many_arguments)]
pub fn sign_request_at(
    now: DateTime<Utc>,
    method: &str,
    url: &str,
    headers: &mut HeaderMap,
    body: &[u8],
    credentials: &AwsCredentials,
    region: &str,
    service: &str,
) -> anyhow::Result<()> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();

    let parsed_url = Url::parse(url).map_err(|e| anyhow::anyhow!("SigV4: invalid URL: {}", e))?;
    let host = parsed_url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("SigV4: URL has no host"))?;
    let host = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let canonical_uri = if parsed_url.path().is_empty() { "/" } else { parsed_url.path() };

    let mut query_pairs: Vec<(String, String)> = parsed_url
        .query_pairs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    query_pairs.sort();
    let canonical_querystring = query_pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    let payload_hash = sha256_hex(body);

    headers.insert(
        HeaderName::from_static("x-amz-date"),
        HeaderValue::from_str(&amz_date)?,
    );
    headers.insert(
        HeaderName::from_static("x-amz-content-sha256"),
        HeaderValue::from_str(&payload_hash)?,
    );
    if let Some(token) = &credentials.session_token {
        headers.insert(
            HeaderName::from_static("x-amz-security-token"),
            HeaderValue::from_str(token)?,
        );
    }
    headers.insert(reqwest::header::HOST, HeaderValue::from_str(&host)?);
    headers.remove(reqwest::header::AUTHORIZATION);

    // HeaderMap keys are already lowercase.
    let mut signed: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().map(str::trim))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("SigV4: non-ascii header {}: {}", name, e))?;
        signed.push((name.as_str().to_string(), values.join(",")));
    }
    signed.sort();

    let canonical_headers: String = signed
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect();
    let signed_headers = signed
        .iter()
        .map(|(name, _)| name.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, canonical_uri, canonical_querystring, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, region, service);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        sha256_hex(canonical_request.as_bytes())
    );

    let signing_key =
        derive_signing_key(&credentials.secret_access_key, &date_stamp, region, service)?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );
    headers.insert(reqwest::header::AUTHORIZATION, HeaderValue::from_str(&authorization)?);

    Ok(())
}
