//! Request credentials.
//!
//! A [`Credential`] is chosen when a client is built and never changes. The
//! signing policy calls [`Credential::sign`] once per attempt, after
//! `x-ms-date` has been set.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{BlobError, BlobResult, RequestError};
use crate::pipeline::PipelineRequest;

type HmacSha256 = Hmac<Sha256>;

/// Standard headers in the order they appear in the shared-key string-to-sign.
const SIGNED_STANDARD_HEADERS: [&str; 11] = [
    "content-encoding",
    "content-language",
    "content-length",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// How requests are authorized.
#[derive(Debug, Clone, Default)]
pub enum Credential {
    /// No authorization header (public containers, or SAS in the URL).
    #[default]
    Anonymous,
    /// Account name and key.
    SharedKey(SharedKeyCredential),
    /// OAuth bearer token.
    Token(TokenCredential),
}

impl Credential {
    /// Adds authorization to `request`.
    pub fn sign(&self, request: &mut PipelineRequest) -> Result<(), RequestError> {
        match self {
            Self::Anonymous => Ok(()),
            Self::SharedKey(key) => key.sign(request),
            Self::Token(token) => {
                request.insert_header("authorization", &format!("Bearer {}", token.token))
            }
        }
    }
}

/// Shared-key credential: account name plus the decoded account key.
#[derive(Clone)]
pub struct SharedKeyCredential {
    account: String,
    key: Vec<u8>,
}

impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SharedKeyCredential {
    /// Creates a credential from the account name and base64 account key.
    pub fn new(account: impl Into<String>, key_base64: &str) -> BlobResult<Self> {
        let account = account.into();
        if account.is_empty() {
            return Err(BlobError::Credential("account name is empty".to_string()));
        }
        let key = STANDARD
            .decode(key_base64.trim())
            .map_err(|e| BlobError::Credential(format!("account key is not valid base64: {}", e)))?;
        if key.is_empty() {
            return Err(BlobError::Credential("account key is empty".to_string()));
        }
        Ok(Self { account, key })
    }

    /// Account name.
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Base64 HMAC-SHA256 of `string_to_sign` under the account key.
    pub fn compute_signature(&self, string_to_sign: &str) -> Result<String, RequestError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| RequestError::Signing(format!("HMAC key error: {}", e)))?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Shared-key string-to-sign for `request`.
    ///
    /// ```text
    /// VERB\n
    /// Content-Encoding\n ... Range\n      (11 standard headers)
    /// x-ms-*:value\n ...                  (sorted by name)
    /// /account/path[\nparam:value ...]    (params sorted by name)
    /// ```
    pub fn string_to_sign(&self, request: &PipelineRequest) -> String {
        let mut out = String::new();
        out.push_str(request.method.as_str());
        out.push('\n');

        for name in SIGNED_STANDARD_HEADERS {
            let value = match name {
                // An empty body is signed as an empty string, not "0".
                "content-length" if !request.body.is_empty() => request.body.len().to_string(),
                "content-length" => String::new(),
                other => request.header(other).unwrap_or_default().to_string(),
            };
            out.push_str(&value);
            out.push('\n');
        }

        out.push_str(&self.canonicalized_headers(request));
        out.push_str(&self.canonicalized_resource(request));
        out
    }

    fn canonicalized_headers(&self, request: &PipelineRequest) -> String {
        let mut names: Vec<&str> = request
            .headers
            .keys()
            .map(|k| k.as_str())
            .filter(|k| k.starts_with("x-ms-"))
            .collect();
        names.sort_unstable();
        names.dedup();

        let mut out = String::new();
        for name in names {
            let values: Vec<&str> = request
                .headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(str::trim)
                .collect();
            out.push_str(name);
            out.push(':');
            out.push_str(&values.join(","));
            out.push('\n');
        }
        out
    }

    fn canonicalized_resource(&self, request: &PipelineRequest) -> String {
        let mut out = format!("/{}{}", self.account, request.url.path());

        let mut params: Vec<(String, String)> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.to_lowercase(), v.into_owned()))
            .collect();
        params.sort();

        let mut i = 0;
        while i < params.len() {
            let name = &params[i].0;
            let mut values = vec![params[i].1.as_str()];
            let mut j = i + 1;
            while j < params.len() && params[j].0 == *name {
                values.push(&params[j].1);
                j += 1;
            }
            out.push('\n');
            out.push_str(name);
            out.push(':');
            out.push_str(&values.join(","));
            i = j;
        }
        out
    }

    fn sign(&self, request: &mut PipelineRequest) -> Result<(), RequestError> {
        let signature = self.compute_signature(&self.string_to_sign(request))?;
        request.insert_header(
            "authorization",
            &format!("SharedKey {}:{}", self.account, signature),
        )
    }
}

/// Bearer token credential.
#[derive(Clone)]
pub struct TokenCredential {
    token: String,
}

impl TokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for TokenCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCredential")
            .field("token", &"<redacted>")
            .finish()
    }
}
