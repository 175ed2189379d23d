use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag alias that is resolved against the registry before anything runs.
pub const LATEST_TAG: &str = "latest";

/// Env variable that carries the POST body into the container.
pub const POST_DATA_ENV: &str = "POST_DATA";

/// Image coordinates as they arrive from the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// True while the tag is still the `latest` alias.
    pub fn is_latest_alias(&self) -> bool {
        self.tag == LATEST_TAG
    }

    /// Same image pinned to a concrete tag.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            name: self.name.clone(),
            tag: tag.into(),
        }
    }
}

/// Fully qualified reference handed to the engine: `registry/name:tag`.
impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}:{}", self.name, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.name, self.tag)
        }
    }
}

/// How the payload reaches the container.
///
/// GET-style invocations pass process arguments (`Cmd`), POST-style ones pass
/// environment entries (`Env`). A request never carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "values", rename_all = "lowercase")]
pub enum InvocationMode {
    Args(Vec<String>),
    Env(Vec<String>),
}

impl InvocationMode {
    /// Raw query string becomes the single container argument when present
    pub fn from_query(query: &str) -> Self {
        if query.is_empty() {
            Self::Args(Vec::new())
        } else {
            Self::Args(vec![query.to_string()])
        }
    }

    /// Request body becomes `POST_DATA=<body>` when present
    pub fn from_post_body(body: &str) -> Self {
        if body.is_empty() {
            Self::Env(Vec::new())
        } else {
            Self::Env(vec![format!("{}={}", POST_DATA_ENV, body)])
        }
    }

    pub fn params(&self) -> &[String] {
        match self {
            Self::Args(values) | Self::Env(values) => values,
        }
    }

    /// HTTP method this mode corresponds to (recorded in audit events)
    pub fn method(&self) -> &'static str {
        match self {
            Self::Args(_) => "GET",
            Self::Env(_) => "POST",
        }
    }
}

/// One request to run an image once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    pub image: ImageReference,
    pub mode: InvocationMode,
}

impl InvocationRequest {
    pub fn new(image: ImageReference, mode: InvocationMode) -> Self {
        Self { image, mode }
    }
}
