use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

pub const LOCATION_UNAVAILABLE: &str = "Location Unavailable";

/// Best-effort, human readable location of the machine. Resolved once per process.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn resolve(&self) -> String;
}

/// Always reports the same location, used when the location is configured explicitly.
pub struct StaticLocation(pub String);

#[async_trait]
impl LocationProvider for StaticLocation {
    async fn resolve(&self) -> String {
        self.0.clone()
    }
}

#[derive(Deserialize, Debug)]
struct IpInfoBody {
    city: Option<String>,
    region: Option<String>,
}

/// Looks the location up through an ipinfo style JSON service.
pub struct IpInfoLocation {
    url: Url,
    timeout: Duration,
}

impl IpInfoLocation {
    pub fn new(url: Url, timeout: Duration) -> Self {
        Self { url, timeout }
    }

    async fn lookup(&self) -> Result<String, reqwest::Error> {
        let client = Client::builder().timeout(self.timeout).build()?;
        let body: IpInfoBody = client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("Location lookup returned {body:?}");
        Ok(match (body.city, body.region) {
            (Some(city), Some(region)) => format!("{city}, {region}"),
            (Some(v), None) | (None, Some(v)) => v,
            (None, None) => LOCATION_UNAVAILABLE.to_string(),
        })
    }
}

#[async_trait]
impl LocationProvider for IpInfoLocation {
    async fn resolve(&self) -> String {
        self.lookup().await.unwrap_or_else(|e| {
            warn!("Location lookup failed {e}");
            LOCATION_UNAVAILABLE.to_string()
        })
    }
}
