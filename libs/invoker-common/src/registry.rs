// Registry tag lookup for the `latest` alias
// Tags are sorted lexicographically and the second-highest wins; the highest
// entry is expected to be `latest` itself.

use crate::types::ImageReference;
use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no registry configured for image {0}")]
    NoRegistry(String),
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry lists {count} tag(s) for {image}, need at least 2 to resolve latest")]
    NotEnoughTags { image: String, count: usize },
}

/// Body of `GET /v2/<name>/tags/list`
#[derive(Debug, Deserialize)]
pub struct TagList {
    pub name: String,
    /// `null` when the repository has no tags
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[async_trait]
pub trait TagResolver: Send + Sync {
    async fn list_tags(&self, image: &ImageReference) -> Result<Vec<String>, RegistryError>;

    /// Concrete tag that `latest` currently stands for
    async fn resolve_latest(&self, image: &ImageReference) -> Result<String, RegistryError> {
        let tags = self.list_tags(image).await?;
        second_highest_tag(&image.name, tags)
    }
}

pub fn second_highest_tag(image: &str, mut tags: Vec<String>) -> Result<String, RegistryError> {
    if tags.len() < 2 {
        return Err(RegistryError::NotEnoughTags {
            image: image.to_string(),
            count: tags.len(),
        });
    }
    tags.sort();
    Ok(tags.swap_remove(tags.len() - 2))
}

/// Docker Registry HTTP API v2 client
#[derive(Debug, Clone)]
pub struct RegistryTagResolver {
    client: reqwest::Client,
    scheme: String,
}

impl RegistryTagResolver {
    pub fn new(scheme: impl Into<String>) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("invoker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            scheme: scheme.into(),
        })
    }

    pub fn tags_url(&self, image: &ImageReference) -> String {
        format!("{}://{}/v2/{}/tags/list", self.scheme, image.registry, image.name)
    }
}

#[async_trait]
impl TagResolver for RegistryTagResolver {
    async fn list_tags(&self, image: &ImageReference) -> Result<Vec<String>, RegistryError> {
        if image.registry.is_empty() {
            return Err(RegistryError::NoRegistry(image.name.clone()));
        }

        let url = self.tags_url(image);
        debug!(url = %url, "listing registry tags");

        let list: TagList = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let tags = list.tags.unwrap_or_default();
        debug!(image = %list.name, tags = tags.len(), "registry tags listed");
        Ok(tags)
    }
}
