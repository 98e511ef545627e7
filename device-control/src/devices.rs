use crate::types::Device;
use pdk::{AuthenticatedClient, RequestError};
use serde_json::json;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Accepted open durations, in tenths of a second.
pub const DWELL_RANGE: RangeInclusive<u32> = 1..=5400;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("dwell must be between 1 and 5400 tenths of a second, got {0}")]
    InvalidDwell(u32),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Lists and commands the devices behind a cloud node.
pub struct Devices {
    client: Arc<AuthenticatedClient>,
}

impl Devices {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    pub async fn list(&self, cloud_node_id: &str) -> Result<Vec<Device>, RequestError> {
        let endpoint = format!("cloud-nodes/{}/devices", urlencoding::encode(cloud_node_id));
        let devices: Vec<Device> = self.client.get_as(&endpoint, &[]).await?;
        info!(cloud_node_id = %cloud_node_id, count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Opens a device. Without `dwell` the device's configured default applies.
    pub async fn try_open(&self, cloud_node_id: &str, device_id: &str, dwell: Option<u32>) -> Result<(), DeviceError> {
        let body = match dwell {
            Some(d) if !DWELL_RANGE.contains(&d) => return Err(DeviceError::InvalidDwell(d)),
            Some(d) => json!({ "dwell": d }),
            None => json!({}),
        };

        self.command(cloud_node_id, device_id, "try-open", &body).await?;
        info!(cloud_node_id = %cloud_node_id, device_id = %device_id, dwell = ?dwell, "Device opened");
        Ok(())
    }

    pub async fn close(&self, cloud_node_id: &str, device_id: &str) -> Result<(), DeviceError> {
        self.command(cloud_node_id, device_id, "close", &json!({})).await?;
        info!(cloud_node_id = %cloud_node_id, device_id = %device_id, "Device closed");
        Ok(())
    }

    async fn command(
        &self,
        cloud_node_id: &str,
        device_id: &str,
        action: &str,
        body: &serde_json::Value,
    ) -> Result<(), RequestError> {
        let endpoint = format!(
            "cloud-nodes/{}/devices/{}/{}",
            urlencoding::encode(cloud_node_id),
            urlencoding::encode(device_id),
            action
        );
        self.client.post(&endpoint, &[], Some(body), None).await.map(|_| ()).map_err(|e| {
            error!(device_id = %device_id, action = %action, error = %e, "Device command failed");
            e
        })
    }
}
