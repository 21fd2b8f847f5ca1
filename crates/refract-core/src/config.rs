//! Configuration module
//!
//! Service configuration loaded from the environment: server settings,
//! artifact store backend, source domain restrictions and the paths of the
//! external image-processing binaries.

use std::env;
use std::path::PathBuf;

use crate::storage_types::StorageBackend;

const DEFAULT_PORT: u16 = 8080;
const SOURCE_FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_SOURCE_SIZE_MB: usize = 25;
const HEADER_CACHE_DAYS: u64 = 365;

/// Server-level settings
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
}

/// Transformation service configuration
#[derive(Clone, Debug)]
pub struct TransformServiceConfig {
    pub base: BaseConfig,
    // Artifact store
    pub storage_backend: StorageBackend,
    pub local_storage_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // S3-compatible providers (MinIO, R2, ...)
    // Source restrictions
    pub restricted_domains: bool,
    pub whitelist_domains: Vec<String>,
    pub allow_local_sources: bool,
    pub allow_private_sources: bool,
    // External binaries
    pub convert_path: String,
    pub mogrify_path: String,
    pub facedetect_path: String,
    pub mozjpeg_path: String,
    // Request processing
    pub tmp_dir: PathBuf,
    pub source_fetch_timeout_secs: u64,
    pub max_source_size_bytes: usize,
    pub single_flight_enabled: bool,
    pub header_cache_days: u64,
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config(pub Box<TransformServiceConfig>);

impl Config {
    fn inner(&self) -> &TransformServiceConfig {
        &self.0
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let environment = self.inner().base.environment.to_lowercase();
        environment == "production" || environment == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        let config = TransformServiceConfig::from_lookup(|name| env::var(name).ok())?;
        Ok(Self(Box::new(config)))
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        self.inner().validate()
    }

    pub fn server_port(&self) -> u16 {
        self.inner().base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.inner().base.environment
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.inner().storage_backend
    }

    pub fn local_storage_path(&self) -> &str {
        &self.inner().local_storage_path
    }

    pub fn s3_bucket(&self) -> Option<&str> {
        self.inner().s3_bucket.as_deref()
    }

    pub fn s3_region(&self) -> Option<&str> {
        self.inner().s3_region.as_deref()
    }

    pub fn s3_endpoint(&self) -> Option<&str> {
        self.inner().s3_endpoint.as_deref()
    }

    pub fn restricted_domains(&self) -> bool {
        self.inner().restricted_domains
    }

    pub fn whitelist_domains(&self) -> &[String] {
        &self.inner().whitelist_domains
    }

    /// `file://` URLs and plain paths as sources; off by default
    pub fn allow_local_sources(&self) -> bool {
        self.inner().allow_local_sources
    }

    /// Remote sources on loopback, private or link-local addresses
    pub fn allow_private_sources(&self) -> bool {
        self.inner().allow_private_sources
    }

    pub fn convert_path(&self) -> &str {
        &self.inner().convert_path
    }

    pub fn mogrify_path(&self) -> &str {
        &self.inner().mogrify_path
    }

    pub fn facedetect_path(&self) -> &str {
        &self.inner().facedetect_path
    }

    pub fn mozjpeg_path(&self) -> &str {
        &self.inner().mozjpeg_path
    }

    pub fn tmp_dir(&self) -> &PathBuf {
        &self.inner().tmp_dir
    }

    pub fn source_fetch_timeout_secs(&self) -> u64 {
        self.inner().source_fetch_timeout_secs
    }

    pub fn max_source_size_bytes(&self) -> usize {
        self.inner().max_source_size_bytes
    }

    pub fn single_flight_enabled(&self) -> bool {
        self.inner().single_flight_enabled
    }

    pub fn header_cache_days(&self) -> u64 {
        self.inner().header_cache_days
    }
}

fn parse_flag(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| v.trim().to_lowercase())
        .and_then(|v| match v.as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

impl TransformServiceConfig {
    /// Build the configuration from a variable lookup. `from_env` passes
    /// `std::env::var`; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|s| !s.trim().is_empty());

        let environment = lookup("ENVIRONMENT")
            .or_else(|| lookup("APP_ENV"))
            .unwrap_or_else(|| "development".to_string());

        let base = BaseConfig {
            server_port: lookup("PORT")
                .unwrap_or_else(|| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
        };

        let storage_backend = lookup("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .parse::<StorageBackend>()?;

        let whitelist_domains = lookup("WHITELIST_DOMAINS")
            .unwrap_or_default()
            .split(',')
            .map(|domain| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        let max_source_size_mb = lookup("MAX_SOURCE_SIZE_MB")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(MAX_SOURCE_SIZE_MB);

        let config = Self {
            base,
            storage_backend,
            local_storage_path: lookup("LOCAL_STORAGE_PATH")
                .unwrap_or_else(|| "./var/storage".to_string()),
            s3_bucket: non_empty("S3_BUCKET"),
            s3_region: non_empty("S3_REGION").or_else(|| non_empty("AWS_REGION")),
            s3_endpoint: non_empty("S3_ENDPOINT"),
            restricted_domains: parse_flag(lookup("RESTRICTED_DOMAINS"), false),
            whitelist_domains,
            allow_local_sources: parse_flag(lookup("ALLOW_LOCAL_SOURCES"), false),
            allow_private_sources: parse_flag(lookup("ALLOW_PRIVATE_SOURCES"), false),
            convert_path: lookup("IMAGEMAGICK_CONVERT_PATH")
                .unwrap_or_else(|| "convert".to_string()),
            mogrify_path: lookup("IMAGEMAGICK_MOGRIFY_PATH")
                .unwrap_or_else(|| "mogrify".to_string()),
            facedetect_path: lookup("FACEDETECT_PATH").unwrap_or_else(|| "facedetect".to_string()),
            mozjpeg_path: lookup("MOZJPEG_PATH")
                .unwrap_or_else(|| "/opt/mozjpeg/bin/cjpeg".to_string()),
            tmp_dir: non_empty("TMP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            source_fetch_timeout_secs: lookup("SOURCE_FETCH_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(SOURCE_FETCH_TIMEOUT_SECS),
            max_source_size_bytes: max_source_size_mb.saturating_mul(1024 * 1024),
            single_flight_enabled: parse_flag(lookup("SINGLE_FLIGHT_ENABLED"), false),
            header_cache_days: lookup("HEADER_CACHE_DAYS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(HEADER_CACHE_DAYS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.restricted_domains && self.whitelist_domains.is_empty() {
            return Err(anyhow::anyhow!(
                "RESTRICTED_DOMAINS=true requires WHITELIST_DOMAINS to list at least one domain"
            ));
        }

        if self.source_fetch_timeout_secs == 0 {
            return Err(anyhow::anyhow!(
                "SOURCE_FETCH_TIMEOUT_SECS must be greater than zero"
            ));
        }

        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<TransformServiceConfig, anyhow::Error> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        TransformServiceConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.base.server_port, 8080);
        assert_eq!(config.base.environment, "development");
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.local_storage_path, "./var/storage");
        assert!(!config.restricted_domains);
        assert!(config.whitelist_domains.is_empty());
        assert!(!config.allow_local_sources);
        assert!(!config.allow_private_sources);
        assert_eq!(config.convert_path, "convert");
        assert_eq!(config.mogrify_path, "mogrify");
        assert_eq!(config.facedetect_path, "facedetect");
        assert_eq!(config.mozjpeg_path, "/opt/mozjpeg/bin/cjpeg");
        assert_eq!(config.source_fetch_timeout_secs, 30);
        assert_eq!(config.max_source_size_bytes, 25 * 1024 * 1024);
        assert!(!config.single_flight_enabled);
        assert_eq!(config.header_cache_days, 365);
    }

    #[test]
    fn test_whitelist_is_trimmed_and_lowercased() {
        let config = load(&[
            ("RESTRICTED_DOMAINS", "true"),
            ("WHITELIST_DOMAINS", " Example.com, ,cdn.example.org "),
        ])
        .unwrap();
        assert!(config.restricted_domains);
        assert_eq!(config.whitelist_domains, vec!["example.com", "cdn.example.org"]);
    }

    #[test]
    fn test_restricted_without_whitelist_is_rejected() {
        let err = load(&[("RESTRICTED_DOMAINS", "1")]).unwrap_err();
        assert!(err.to_string().contains("WHITELIST_DOMAINS"));
    }

    #[test]
    fn test_s3_requires_bucket_and_region() {
        let err = load(&[("STORAGE_BACKEND", "s3")]).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));

        let err = load(&[("STORAGE_BACKEND", "s3"), ("S3_BUCKET", "images")]).unwrap_err();
        assert!(err.to_string().contains("S3_REGION"));

        let config = load(&[
            ("STORAGE_BACKEND", "s3"),
            ("S3_BUCKET", "images"),
            ("AWS_REGION", "eu-west-1"),
        ])
        .unwrap();
        assert_eq!(config.s3_region.as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(load(&[("PORT", "eighty")]).is_err());
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config = load(&[
            ("SOURCE_FETCH_TIMEOUT_SECS", "soon"),
            ("HEADER_CACHE_DAYS", "-1"),
        ])
        .unwrap();
        assert_eq!(config.source_fetch_timeout_secs, 30);
        assert_eq!(config.header_cache_days, 365);
    }

    #[test]
    fn test_huge_source_size_saturates() {
        let huge = usize::MAX.to_string();
        let config = load(&[("MAX_SOURCE_SIZE_MB", huge.as_str())]).unwrap();
        assert_eq!(config.max_source_size_bytes, usize::MAX);

        let config = load(&[("MAX_SOURCE_SIZE_MB", "2")]).unwrap();
        assert_eq!(config.max_source_size_bytes, 2 * 1024 * 1024);
    }

    #[test]
    fn test_source_flags() {
        let config = load(&[
            ("ALLOW_LOCAL_SOURCES", "true"),
            ("ALLOW_PRIVATE_SOURCES", "1"),
        ])
        .unwrap();
        assert!(config.allow_local_sources);
        assert!(config.allow_private_sources);
    }

    #[test]
    fn test_is_production() {
        let config = Config(Box::new(load(&[("APP_ENV", "Prod")]).unwrap()));
        assert!(config.is_production());
        let config = Config(Box::new(load(&[]).unwrap()));
        assert!(!config.is_production());
    }
}
