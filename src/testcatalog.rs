//! Client for the API server test catalog

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// Read and write access to test catalog entries
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TestCatalog: Send + Sync {
    /// Whether a catalog exists at `url`
    async fn exists(&self, url: &str) -> Result<bool, Error>;

    /// Store a JSON catalog at `url`
    async fn upload(&self, url: &str, body: Vec<u8>) -> Result<(), Error>;
}

/// [`TestCatalog`] over HTTP
pub struct HttpTestCatalog {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpTestCatalog {
    /// Client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            retry: RetryConfig::default(),
        })
    }
}

#[async_trait]
impl TestCatalog for HttpTestCatalog {
    async fn exists(&self, url: &str) -> Result<bool, Error> {
        retry_with_backoff(&self.retry, "testcatalog probe", || async {
            let resp = self.client.get(url).send().await?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(false),
                s if s.is_success() => Ok(true),
                s => Err(Error::test_catalog(format!("GET {url} returned {s}"))),
            }
        })
        .await
    }

    async fn upload(&self, url: &str, body: Vec<u8>) -> Result<(), Error> {
        retry_with_backoff(&self.retry, "testcatalog upload", || async {
            let resp = self
                .client
                .put(url)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await?;
            if resp.status().is_success() {
                Ok(())
            } else {
                Err(Error::test_catalog(format!(
                    "PUT {url} returned {}",
                    resp.status()
                )))
            }
        })
        .await
    }
}

/// Upload the bundled Simbank catalog to `location` unless one is already there
///
/// Returns whether an upload happened.
pub async fn seed_catalog(
    catalog: &dyn TestCatalog,
    location: &str,
    fixture: &Path,
) -> Result<bool, Error> {
    if catalog.exists(location).await? {
        debug!(%location, "test catalog already present");
        return Ok(false);
    }

    let body = tokio::fs::read(fixture).await.map_err(|e| {
        Error::test_catalog(format!("reading {}: {e}", fixture.display()))
    })?;
    catalog.upload(location, body).await?;
    info!(%location, "test catalog uploaded");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const LOCATION: &str = "http://galasa.example.com:30080/testcatalog/simbank";

    fn fixture(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    /// Story: a missing catalog is uploaded from the bundled fixture
    #[tokio::test]
    async fn story_missing_catalog_is_uploaded() {
        let file = fixture(r#"{"classes":{}}"#);

        let mut catalog = MockTestCatalog::new();
        catalog
            .expect_exists()
            .withf(|url| url == LOCATION)
            .returning(|_| Ok(false));
        catalog
            .expect_upload()
            .withf(|url, body| url == LOCATION && body.as_slice() == br#"{"classes":{}}"#)
            .times(1)
            .returning(|_, _| Ok(()));

        assert!(seed_catalog(&catalog, LOCATION, file.path()).await.unwrap());
    }

    #[tokio::test]
    async fn test_existing_catalog_is_not_overwritten() {
        let mut catalog = MockTestCatalog::new();
        catalog.expect_exists().returning(|_| Ok(true));
        catalog.expect_upload().never();

        let uploaded = seed_catalog(&catalog, LOCATION, Path::new("/nonexistent"))
            .await
            .unwrap();
        assert!(!uploaded);
    }

    #[tokio::test]
    async fn test_missing_fixture_is_an_error() {
        let mut catalog = MockTestCatalog::new();
        catalog.expect_exists().returning(|_| Ok(false));
        catalog.expect_upload().never();

        let err = seed_catalog(&catalog, LOCATION, Path::new("/nonexistent/catalog.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TestCatalog(_)));
        assert!(err.to_string().contains("/nonexistent/catalog.json"));
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let mut catalog = MockTestCatalog::new();
        catalog
            .expect_exists()
            .returning(|_| Err(Error::test_catalog("GET returned 500")));
        catalog.expect_upload().never();

        assert!(seed_catalog(&catalog, LOCATION, Path::new("/x")).await.is_err());
    }
}
