//! Door and gate control for a PDK system.
//!
//! Thin endpoint wrappers over [`pdk::AuthenticatedClient`]; authentication,
//! token caching and refresh all happen underneath.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  CloudNodes / Devices         │
//! └──────────────────────────────┘
//!              ↓
//! ┌──────────────────────────────┐
//! │  AuthenticatedClient          │
//! │  - bearer system token        │
//! └──────────────────────────────┘
//!              ↓
//! ┌──────────────────────────────┐
//! │  TokenLifecycleManager        │
//! │  - cache, exchange, login     │
//! └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use device_control::{CloudNodes, Devices};
//! use pdk::{AccountCredentials, AuthenticatedClient, PdkConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let login = AccountCredentials::from_file("credentials.json")?;
//! let client = Arc::new(AuthenticatedClient::from_config(&PdkConfig::default(), login)?);
//!
//! let nodes = CloudNodes::new(client.clone()).list(None, None).await?;
//! let devices = Devices::new(client);
//! for node in &nodes {
//!     for device in devices.list(&node.id).await? {
//!         println!("{} / {}", node.name, device.name);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod cloud_nodes;
pub mod devices;
pub mod types;

pub use cloud_nodes::CloudNodes;
pub use devices::{DeviceError, Devices, DWELL_RANGE};
pub use types::{CloudNode, ConnectionStatus, Device};
