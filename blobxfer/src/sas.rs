//! Service SAS tokens for containers and blobs.
//!
//! # Example
//!
//! ```
//! use chrono::{TimeZone, Utc};
//! use blobxfer::credential::SharedKeyCredential;
//! use blobxfer::sas::{BlobSasBuilder, BlobSasPermissions};
//!
//! let key = SharedKeyCredential::new("acct", "c2VjcmV0LWtleS1ieXRlcw==").unwrap();
//! let expiry = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
//! let token = BlobSasBuilder::new("photos", "r".parse::<BlobSasPermissions>().unwrap(), expiry)
//!     .with_blob("cat.png")
//!     .sign(&key)
//!     .unwrap();
//! assert!(token.starts_with("sv="));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use url::form_urlencoded;

use crate::credential::SharedKeyCredential;
use crate::error::{BlobError, BlobResult};
use crate::pipeline::API_VERSION;

/// Permissions granted by a SAS, rendered in `racwdl` order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlobSasPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
    pub list: bool,
}

impl BlobSasPermissions {
    /// True when no permission is granted.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl FromStr for BlobSasPermissions {
    type Err = BlobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut perms = Self::default();
        for c in s.chars() {
            match c {
                'r' => perms.read = true,
                'a' => perms.add = true,
                'c' => perms.create = true,
                'w' => perms.write = true,
                'd' => perms.delete = true,
                'l' => perms.list = true,
                other => {
                    return Err(BlobError::InvalidConfig(format!(
                        "unknown SAS permission '{}' (expected any of racwdl)",
                        other
                    )))
                }
            }
        }
        Ok(perms)
    }
}

impl fmt::Display for BlobSasPermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
            (self.list, 'l'),
        ];
        for (set, c) in flags {
            if set {
                write!(f, "{}", c)?;
            }
        }
        Ok(())
    }
}

/// Allowed protocols for requests made with the SAS.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SasProtocol {
    Https,
    HttpsAndHttp,
}

impl fmt::Display for SasProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Https => write!(f, "https"),
            Self::HttpsAndHttp => write!(f, "https,http"),
        }
    }
}

/// Builds a service SAS for a container or a single blob.
#[derive(Clone, Debug)]
pub struct BlobSasBuilder {
    container: String,
    blob: Option<String>,
    permissions: BlobSasPermissions,
    start: Option<DateTime<Utc>>,
    expiry: DateTime<Utc>,
    protocol: Option<SasProtocol>,
    ip_range: Option<String>,
}

impl BlobSasBuilder {
    /// SAS for `container` with the given permissions, valid until `expiry`.
    pub fn new(
        container: impl Into<String>,
        permissions: BlobSasPermissions,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            container: container.into(),
            blob: None,
            permissions,
            start: None,
            expiry,
            protocol: None,
            ip_range: None,
        }
    }

    /// Narrow the SAS to one blob.
    pub fn with_blob(mut self, blob: impl Into<String>) -> Self {
        self.blob = Some(blob.into());
        self
    }

    /// Set the time the SAS becomes valid.
    pub fn with_start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    /// Restrict the allowed protocols.
    pub fn with_protocol(mut self, protocol: SasProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Restrict the allowed client IPs (`a.b.c.d` or `a.b.c.d-e.f.g.h`).
    pub fn with_ip_range(mut self, range: impl Into<String>) -> Self {
        self.ip_range = Some(range.into());
        self
    }

    fn resource(&self) -> &'static str {
        if self.blob.is_some() {
            "b"
        } else {
            "c"
        }
    }

    /// String-to-sign in the 2018-11-09 layout.
    pub fn string_to_sign(&self, account: &str) -> String {
        let canonical = match &self.blob {
            Some(blob) => format!("/blob/{}/{}/{}", account, self.container, blob),
            None => format!("/blob/{}/{}", account, self.container),
        };
        [
            self.permissions.to_string(),
            self.start.map(format_time).unwrap_or_default(),
            format_time(self.expiry),
            canonical,
            String::new(), // signed identifier
            self.ip_range.clone().unwrap_or_default(),
            self.protocol.map(|p| p.to_string()).unwrap_or_default(),
            API_VERSION.to_string(),
            self.resource().to_string(),
            String::new(), // snapshot time
            String::new(), // rscc
            String::new(), // rscd
            String::new(), // rsce
            String::new(), // rscl
            String::new(), // rsct
        ]
        .join("\n")
    }

    /// Signs the SAS and returns the URL-encoded query string.
    pub fn sign(&self, credential: &SharedKeyCredential) -> BlobResult<String> {
        if self.permissions.is_empty() {
            return Err(BlobError::InvalidConfig(
                "a SAS needs at least one permission".to_string(),
            ));
        }
        if matches!(self.start, Some(start) if start >= self.expiry) {
            return Err(BlobError::InvalidConfig(
                "SAS start time must be before its expiry".to_string(),
            ));
        }

        let signature = credential
            .compute_signature(&self.string_to_sign(credential.account()))
            .map_err(|e| BlobError::Credential(e.to_string()))?;

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("sv", API_VERSION);
        if let Some(protocol) = self.protocol {
            query.append_pair("spr", &protocol.to_string());
        }
        if let Some(start) = self.start {
            query.append_pair("st", &format_time(start));
        }
        query.append_pair("se", &format_time(self.expiry));
        if let Some(range) = &self.ip_range {
            query.append_pair("sip", range);
        }
        query.append_pair("sr", self.resource());
        query.append_pair("sp", &self.permissions.to_string());
        query.append_pair("sig", &signature);
        Ok(query.finish())
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
