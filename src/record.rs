use chrono::{DateTime, Duration, Utc};

/// Suffix appended to a secret id to form its blob object key.
pub const BLOB_KEY_SUFFIX: &str = ".enc";

/// One encrypted, view-limited, time-limited secret.
///
/// `data`, `nonce`, `salt` and `header` are produced by the encryption layer
/// and carried verbatim. For file-backed secrets `data` lives in the blob
/// store and the metadata copy is empty.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretRecord {
    pub secret_id: String,
    pub view_count: u32,
    pub data: Vec<u8>,
    pub is_file: bool,
    pub nonce: Vec<u8>,
    pub salt: Vec<u8>,
    pub header: Vec<u8>,
    /// Absolute expiry, epoch seconds.
    pub ttl: i64,
}

impl SecretRecord {
    /// The input `update_secret` needs to set a view count. Every other
    /// field is left empty; stores ignore it.
    pub fn view_count_update(secret_id: impl Into<String>, view_count: u32) -> SecretRecord {
        SecretRecord {
            secret_id: secret_id.into(),
            view_count,
            data: Vec::new(),
            is_file: false,
            nonce: Vec::new(),
            salt: Vec::new(),
            header: Vec::new(),
            ttl: 0,
        }
    }

    pub fn blob_key(&self) -> String {
        blob_key(&self.secret_id)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.ttl, 0)
    }

    /// Copy with `data` emptied, as written to metadata for file-backed
    /// secrets.
    pub fn without_payload(&self) -> SecretRecord {
        SecretRecord {
            secret_id: self.secret_id.clone(),
            view_count: self.view_count,
            data: Vec::new(),
            is_file: self.is_file,
            nonce: self.nonce.clone(),
            salt: self.salt.clone(),
            header: self.header.clone(),
            ttl: self.ttl,
        }
    }

    /// Expired at-or-after `ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        is_expired(self.ttl, now)
    }
}

// Payload bytes stay out of logs.
impl std::fmt::Debug for SecretRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretRecord")
            .field("secret_id", &self.secret_id)
            .field("view_count", &self.view_count)
            .field("data_len", &self.data.len())
            .field("is_file", &self.is_file)
            .field("nonce_len", &self.nonce.len())
            .field("salt_len", &self.salt.len())
            .field("header_len", &self.header.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}

pub fn blob_key(secret_id: &str) -> String {
    format!("{}{}", secret_id, BLOB_KEY_SUFFIX)
}

pub(crate) fn is_expired(ttl: i64, now: DateTime<Utc>) -> bool {
    now.timestamp() >= ttl
}

/// Epoch seconds `retention` from `now`.
pub fn expiry_after(now: DateTime<Utc>, retention: Duration) -> i64 {
    (now + retention).timestamp()
}

/// Normalise a user-supplied view count: absolute value, truncated, within
/// `1..=9`; anything else falls back to a single view.
///
/// The range check runs before truncation, so fractions below one (`"0.5"`,
/// `"-0.2"`) give 1 rather than the 0 that truncating first would produce.
/// A sanitised count is never zero.
pub fn sanitize_view_count(raw: &str) -> u32 {
    let Ok(parsed) = raw.trim().parse::<f64>() else {
        return 1;
    };
    let vc = parsed.abs();
    if (1.0..10.0).contains(&vc) {
        vc as u32
    } else {
        1
    }
}
