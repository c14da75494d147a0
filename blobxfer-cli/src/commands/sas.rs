//! SAS command - sign a service SAS offline with the account key.

use chrono::{Duration, Utc};

use blobxfer::{BlobSasBuilder, BlobSasPermissions, ConfigFile, Credential, SasProtocol};

use crate::error::CliError;

/// Arguments for the sas command.
pub struct SasArgs {
    pub container: String,
    pub blob: Option<String>,
    pub permissions: String,
    pub expiry_hours: u32,
}

/// Run the sas command.
pub fn run(config: &ConfigFile, args: SasArgs) -> Result<(), CliError> {
    let (token, url) = sign(config, args)?;
    println!("{}", token);
    println!();
    println!("URL: {}", url);
    Ok(())
}

/// Returns the signed query string and the resource URL carrying it.
fn sign(config: &ConfigFile, args: SasArgs) -> Result<(String, String), CliError> {
    let Credential::SharedKey(key) = config.credential()? else {
        return Err(CliError::Config(
            "signing a SAS needs account_name and account_key in [account]".to_string(),
        ));
    };
    if args.expiry_hours == 0 {
        return Err(CliError::Config("--expiry-hours must be at least 1".to_string()));
    }

    let permissions: BlobSasPermissions = args.permissions.parse()?;
    let expiry = Utc::now() + Duration::hours(i64::from(args.expiry_hours));
    let mut builder =
        BlobSasBuilder::new(&args.container, permissions, expiry).with_protocol(SasProtocol::Https);
    if let Some(blob) = &args.blob {
        builder = builder.with_blob(blob);
    }
    let token = builder.sign(&key)?;

    let endpoint = config.endpoint()?;
    let resource = match &args.blob {
        Some(blob) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), args.container, blob),
        None => format!("{}/{}", endpoint.trim_end_matches('/'), args.container),
    };
    let url = format!("{}?{}", resource, token);
    Ok((token, url))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(blob: Option<&str>, permissions: &str) -> SasArgs {
        SasArgs {
            container: "photos".to_string(),
            blob: blob.map(str::to_string),
            permissions: permissions.to_string(),
            expiry_hours: 2,
        }
    }

    fn config_with_key() -> ConfigFile {
        ConfigFile::parse("[account]\naccount_name = acct\naccount_key = c2VjcmV0LWtleS1ieXRlcw==\n")
            .unwrap()
    }

    #[test]
    fn test_blob_sas_url() {
        let (token, url) = sign(&config_with_key(), args(Some("cat.png"), "rw")).unwrap();

        assert!(token.contains("sr=b"));
        assert!(token.contains("sp=rw"));
        assert!(token.contains("spr=https"));
        assert!(url.starts_with("https://acct.blob.core.windows.net/photos/cat.png?sv="));
    }

    #[test]
    fn test_container_sas() {
        let (token, _) = sign(&config_with_key(), args(None, "rl")).unwrap();
        assert!(token.contains("sr=c"));
    }

    #[test]
    fn test_requires_shared_key() {
        let config = ConfigFile::parse("[account]\naccount_name = acct\n").unwrap();
        assert!(matches!(sign(&config, args(None, "r")), Err(CliError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_permission() {
        assert!(sign(&config_with_key(), args(None, "rz")).is_err());
    }
}
