use crate::error::TransformError;
use crate::fetch::is_remote;

/// Source admission and domain allow-list
///
/// Local sources (`file://` URLs and plain paths) are served only when
/// explicitly allowed. When restriction is enabled only remote sources whose
/// host equals an allowed domain, or is a subdomain of one, may be
/// processed; local sources have no host and are refused then as well.
#[derive(Debug, Clone)]
pub struct DomainPolicy {
    restricted: bool,
    allowed: Vec<String>,
    allow_local: bool,
}

impl DomainPolicy {
    pub fn new(restricted: bool, allowed: &[String], allow_local: bool) -> Self {
        Self {
            restricted,
            allowed: allowed.iter().map(|d| d.trim().to_lowercase()).collect(),
            allow_local,
        }
    }

    pub fn check(&self, source: &str) -> Result<(), TransformError> {
        if !is_remote(source) && !self.allow_local {
            tracing::warn!(source = %source, "Refusing local source");
            return Err(TransformError::ForbiddenSource(source.to_string()));
        }
        if !self.restricted {
            return Ok(());
        }

        let host = if is_remote(source) {
            reqwest::Url::parse(source)
                .ok()
                .and_then(|url| url.host_str().map(str::to_lowercase))
        } else {
            None
        };

        let Some(host) = host else {
            tracing::warn!(source = %source, "Refusing source without a host");
            return Err(TransformError::ForbiddenSource(source.to_string()));
        };

        let allowed = self
            .allowed
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)));

        if !allowed {
            tracing::warn!(host = %host, "Refusing source from non-whitelisted domain");
            return Err(TransformError::ForbiddenSource(host));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DomainPolicy {
        DomainPolicy::new(
            true,
            &["example.com".to_string(), "CDN.test".to_string()],
            true,
        )
    }

    #[test]
    fn test_unrestricted_allows_any_remote_host() {
        let policy = DomainPolicy::new(false, &[], false);
        assert!(policy.check("https://anything.test/a.jpg").is_ok());
        assert!(policy.check("HTTP://anything.test/a.jpg").is_ok());
    }

    #[test]
    fn test_local_sources_need_opt_in() {
        let policy = DomainPolicy::new(false, &[], false);
        for source in ["/srv/a.jpg", "file:///srv/a.jpg", "../etc/a.png", "ftp://host/a.jpg"] {
            assert!(
                matches!(policy.check(source), Err(TransformError::ForbiddenSource(_))),
                "{}",
                source
            );
        }

        let policy = DomainPolicy::new(false, &[], true);
        assert!(policy.check("/srv/a.jpg").is_ok());
        assert!(policy.check("file:///srv/a.jpg").is_ok());
    }

    #[test]
    fn test_exact_and_subdomain_matches() {
        let policy = policy();
        assert!(policy.check("https://example.com/a.jpg").is_ok());
        assert!(policy.check("https://img.Example.com:8443/a.jpg").is_ok());
        assert!(policy.check("http://cdn.test/a.jpg").is_ok());
    }

    #[test]
    fn test_rejections() {
        let policy = policy();
        match policy.check("https://evil-example.com/a.jpg") {
            Err(TransformError::ForbiddenSource(host)) => assert_eq!(host, "evil-example.com"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(policy.check("https://example.com.evil.test/a.jpg").is_err());
        assert!(policy.check("/srv/images/a.jpg").is_err());
        assert!(policy.check("file:///srv/images/a.jpg").is_err());
    }
}
