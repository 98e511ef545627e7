use serde::{Deserialize, Serialize};

/// Controller appliance that devices are wired to.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub ipv6_address: Option<String>,
    #[serde(default)]
    pub connection_status: Option<ConnectionStatus>,
}

impl CloudNode {
    pub fn is_connected(&self) -> bool {
        self.connection_status.as_ref().is_some_and(|s| s.connected)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectionStatus {
    #[serde(default)]
    pub connected: bool,
}

/// Door, gate or other controllable output on a cloud node.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub port: Option<u32>,
    /// Default open time in tenths of a second
    #[serde(default)]
    pub dwell: Option<u32>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default)]
    pub reader_type: Option<String>,
}
