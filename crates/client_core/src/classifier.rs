use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::Region,
    protocol::{ClassifyImageRequest, ClassifyImageResponse},
};
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub sensitive: bool,
    pub regions: Vec<Region>,
}

impl Classification {
    pub fn clear() -> Self {
        Self {
            sensitive: false,
            regions: Vec::new(),
        }
    }

    pub fn flagged(regions: Vec<Region>) -> Self {
        Self {
            sensitive: true,
            regions,
        }
    }
}

/// Opaque sensitive-data scoring service.
#[async_trait]
pub trait ImageClassifier: Send + Sync {
    async fn classify(&self, image_ref: &str) -> Result<Classification>;
}

pub struct HttpImageClassifier {
    http: Client,
    endpoint: Url,
}

impl HttpImageClassifier {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).with_context(|| format!("invalid classifier url {base_url}"))?;
        let endpoint = base
            .join("classify_image")
            .context("failed to build classifier endpoint")?;
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { http, endpoint })
    }
}

#[async_trait]
impl ImageClassifier for HttpImageClassifier {
    async fn classify(&self, image_ref: &str) -> Result<Classification> {
        let response: ClassifyImageResponse = self
            .http
            .post(self.endpoint.clone())
            .json(&ClassifyImageRequest {
                image_url: image_ref.to_string(),
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let sensitive = response.sensitive;
        let regions = response.into_regions()?;
        Ok(Classification { sensitive, regions })
    }
}

/// Table-driven classifier: images listed in the table are flagged with
/// their regions, everything else is clear.
#[derive(Default)]
pub struct LookupImageClassifier {
    flagged: HashMap<String, Vec<Region>>,
    latency: Option<Duration>,
}

impl LookupImageClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn flag(mut self, image_ref: impl Into<String>, regions: Vec<Region>) -> Self {
        self.flagged.insert(image_ref.into(), regions);
        self
    }

    /// Adds an entry from raw `[x1, y1, x2, y2]` corners.
    pub fn flag_raw(self, image_ref: impl Into<String>, raw: &[[f64; 4]]) -> Result<Self> {
        let image_ref = image_ref.into();
        let regions = raw
            .iter()
            .map(|[x1, y1, x2, y2]| {
                Region::normalized(*x1, *y1, *x2, *y2)
                    .ok_or_else(|| anyhow!("non-finite region for image {image_ref}"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.flag(image_ref, regions))
    }
}

#[async_trait]
impl ImageClassifier for LookupImageClassifier {
    async fn classify(&self, image_ref: &str) -> Result<Classification> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(match self.flagged.get(image_ref) {
            Some(regions) if !regions.is_empty() => Classification::flagged(regions.clone()),
            _ => Classification::clear(),
        })
    }
}
