//! HTTP publishing sink.
//!
//! Commits and repository configurations are upserted with `PUT` requests
//! carrying JSON documents. Endpoints are resolved once, at construction,
//! from Kubernetes-style service variables (`<SERVICE>_SERVICE_HOST`,
//! `<SERVICE>_SERVICE_PORT`) or from explicit URLs. With no endpoint resolved
//! every publish is a successful no-op.

use reqwest::Url;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PublisherConfig;
use crate::errors::PublishError;
use crate::models::{ExtractedCommit, RepositoryConfig};

/// Document layout an endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Work-item tracker REST API.
    Tracker,
    /// Search index, documents stored under `index`.
    Search,
}

/// One resolved destination.
#[derive(Debug, Clone)]
pub struct Endpoint {
    kind: EndpointKind,
    base: Url,
    index: String,
}

impl Endpoint {
    pub fn tracker(base: &str) -> Result<Self, PublishError> {
        Ok(Self {
            kind: EndpointKind::Tracker,
            base: parse_base(base)?,
            index: String::new(),
        })
    }

    pub fn search(base: &str, index: &str) -> Result<Self, PublishError> {
        Ok(Self {
            kind: EndpointKind::Search,
            base: parse_base(base)?,
            index: index.to_string(),
        })
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    fn commit_url(&self, commit: &ExtractedCommit) -> Result<Url, PublishError> {
        match self.kind {
            EndpointKind::Tracker => self.join(&[
                "api",
                "userspace",
                "git",
                "commits",
                commit.namespace.as_str(),
                "buildConfig",
                commit.build_config_name.as_str(),
                commit.hash.as_str(),
            ]),
            EndpointKind::Search => {
                let id = format!("{}-{}-{}", commit.namespace, commit.build_config_name, commit.hash);
                self.join(&[self.index.as_str(), "commit", id.as_str()])
            }
        }
    }

    fn config_url(&self, config: &RepositoryConfig) -> Result<Url, PublishError> {
        match self.kind {
            EndpointKind::Tracker => self.join(&[
                "api",
                "userspace",
                "kubernetes",
                config.namespace.as_str(),
                "buildconfigs",
                config.name.as_str(),
            ]),
            EndpointKind::Search => {
                let id = format!("{}-{}", config.namespace, config.name);
                self.join(&[self.index.as_str(), "buildconfig", id.as_str()])
            }
        }
    }

    fn join(&self, segments: &[&str]) -> Result<Url, PublishError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PublishError::InvalidUrl {
                url: self.base.to_string(),
                detail: "URL cannot be a base".into(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn parse_base(base: &str) -> Result<Url, PublishError> {
    Url::parse(base).map_err(|e| PublishError::InvalidUrl {
        url: base.to_string(),
        detail: e.to_string(),
    })
}

/// Base URL of a service from its `<NAME>_SERVICE_HOST` / `<NAME>_SERVICE_PORT`
/// variables, or `None` when the host is not set.
pub fn url_from_env(service: &str) -> Option<String> {
    let host = std::env::var(format!("{service}_SERVICE_HOST")).ok()?;
    let host = host.trim();
    if host.is_empty() {
        return None;
    }
    let url = match std::env::var(format!("{service}_SERVICE_PORT")) {
        Ok(port) if !port.trim().is_empty() => format!("http://{}:{}/", host, port.trim()),
        _ => format!("http://{}/", host),
    };
    Some(url)
}

/// Upserts documents to every resolved endpoint.
#[derive(Debug, Clone)]
pub struct Publisher {
    endpoints: Vec<Endpoint>,
    http: reqwest::Client,
}

impl Publisher {
    pub fn new(endpoints: Vec<Endpoint>) -> Self {
        Self {
            endpoints,
            http: reqwest::Client::new(),
        }
    }

    /// A publisher that never sends anything.
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Resolve endpoints from configuration overrides, then from the
    /// environment. Unparseable URLs are logged and skipped.
    pub fn from_config(config: &PublisherConfig) -> Self {
        let tracker = config
            .tracker_url
            .clone()
            .or_else(|| url_from_env(&config.tracker_service));
        let search = config
            .search_url
            .clone()
            .or_else(|| url_from_env(&config.search_service));

        let mut endpoints = Vec::new();
        match tracker.as_deref().map(Endpoint::tracker) {
            Some(Ok(endpoint)) => {
                info!(service = %config.tracker_service, url = %endpoint.base, "publishing to tracker");
                endpoints.push(endpoint);
            }
            Some(Err(e)) => warn!(service = %config.tracker_service, error = %e, "ignoring tracker endpoint"),
            None => info!(service = %config.tracker_service, "tracker not configured"),
        }
        match search.as_deref().map(|url| Endpoint::search(url, &config.search_index)) {
            Some(Ok(endpoint)) => {
                info!(service = %config.search_service, url = %endpoint.base, "publishing to search index");
                endpoints.push(endpoint);
            }
            Some(Err(e)) => warn!(service = %config.search_service, error = %e, "ignoring search endpoint"),
            None => info!(service = %config.search_service, "search index not configured"),
        }
        Self::new(endpoints)
    }

    pub fn is_enabled(&self) -> bool {
        !self.endpoints.is_empty()
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Publish one extracted commit.
    pub async fn upsert_commit(&self, commit: &ExtractedCommit) -> Result<(), PublishError> {
        debug!(repository = %commit.build_config_name, hash = %commit.hash, "publishing commit");
        for endpoint in &self.endpoints {
            let url = endpoint.commit_url(commit)?;
            self.put_json(url, commit).await?;
        }
        Ok(())
    }

    /// Publish a repository configuration.
    pub async fn upsert_config(&self, config: &RepositoryConfig) -> Result<(), PublishError> {
        debug!(repository = %config.name, "publishing configuration");
        for endpoint in &self.endpoints {
            let url = endpoint.config_url(config)?;
            self.put_json(url, config).await?;
        }
        Ok(())
    }

    async fn put_json<T: Serialize + ?Sized>(&self, url: Url, document: &T) -> Result<(), PublishError> {
        let body = serde_json::to_vec(document)?;
        info!(url = %url, "PUT document");

        let resp = self
            .http
            .put(url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(url = %url, status = %status, "publish endpoint returned error");
            return Err(PublishError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(url = %url, status = %status, "document accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signature;
    use chrono::{FixedOffset, TimeZone};

    fn commit() -> ExtractedCommit {
        let when = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .unwrap();
        let sig = Signature {
            name: "A".into(),
            email: "a@example.com".into(),
            when,
        };
        ExtractedCommit {
            namespace: "team-a".into(),
            build_config_name: "svc-a".into(),
            hash: "0123abcd".into(),
            message: "msg".into(),
            author: sig.clone(),
            committer: sig,
        }
    }

    #[test]
    fn test_tracker_urls() {
        let endpoint = Endpoint::tracker("http://wit:8080/").unwrap();
        assert_eq!(
            endpoint.commit_url(&commit()).unwrap().as_str(),
            "http://wit:8080/api/userspace/git/commits/team-a/buildConfig/svc-a/0123abcd"
        );
        let config = RepositoryConfig::new("svc-a", "team-a", "u", None);
        assert_eq!(
            endpoint.config_url(&config).unwrap().as_str(),
            "http://wit:8080/api/userspace/kubernetes/team-a/buildconfigs/svc-a"
        );
    }

    #[test]
    fn test_search_urls_keep_base_path() {
        let endpoint = Endpoint::search("http://es:9200/prefix", "commits").unwrap();
        assert_eq!(
            endpoint.commit_url(&commit()).unwrap().as_str(),
            "http://es:9200/prefix/commits/commit/team-a-svc-a-0123abcd"
        );
        let config = RepositoryConfig::new("svc-a", "team-a", "u", None);
        assert_eq!(
            endpoint.config_url(&config).unwrap().as_str(),
            "http://es:9200/prefix/commits/buildconfig/team-a-svc-a"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            Endpoint::tracker("not a url"),
            Err(PublishError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_url_from_env() {
        std::env::set_var("GCTEST_A_SERVICE_HOST", "10.0.0.1");
        std::env::set_var("GCTEST_A_SERVICE_PORT", "8080");
        std::env::set_var("GCTEST_B_SERVICE_HOST", "wit.svc");
        std::env::remove_var("GCTEST_B_SERVICE_PORT");
        std::env::remove_var("GCTEST_C_SERVICE_HOST");

        assert_eq!(url_from_env("GCTEST_A").as_deref(), Some("http://10.0.0.1:8080/"));
        assert_eq!(url_from_env("GCTEST_B").as_deref(), Some("http://wit.svc/"));
        assert_eq!(url_from_env("GCTEST_C"), None);

        std::env::remove_var("GCTEST_A_SERVICE_HOST");
        std::env::remove_var("GCTEST_A_SERVICE_PORT");
        std::env::remove_var("GCTEST_B_SERVICE_HOST");
    }

    #[test]
    fn test_from_config_prefers_explicit_urls() {
        let config = PublisherConfig {
            tracker_service: "GCTEST_UNSET_TRACKER".into(),
            search_service: "GCTEST_UNSET_SEARCH".into(),
            tracker_url: Some("http://tracker.local/".into()),
            ..PublisherConfig::default()
        };
        let publisher = Publisher::from_config(&config);
        assert!(publisher.is_enabled());
        assert_eq!(publisher.endpoints().len(), 1);
        assert_eq!(publisher.endpoints()[0].kind(), EndpointKind::Tracker);
    }

    #[tokio::test]
    async fn test_disabled_publisher_is_a_noop() {
        let publisher = Publisher::disabled();
        assert!(!publisher.is_enabled());
        publisher.upsert_commit(&commit()).await.unwrap();
        publisher
            .upsert_config(&RepositoryConfig::new("a", "b", "c", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is not expected to accept HTTP.
        let publisher = Publisher::new(vec![Endpoint::tracker("http://127.0.0.1:9/").unwrap()]);
        let result = publisher.upsert_commit(&commit()).await;
        assert!(matches!(result, Err(PublishError::Http(_))));
    }
}
