use crate::types::CloudNode;
use pdk::{AuthenticatedClient, RequestError};
use std::sync::Arc;
use tracing::info;

/// Lists the cloud nodes of the account.
pub struct CloudNodes {
    client: Arc<AuthenticatedClient>,
}

impl CloudNodes {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    /// `page` is zero-based; the server defaults to 10 per page (max 100).
    pub async fn list(&self, page: Option<u32>, per_page: Option<u32>) -> Result<Vec<CloudNode>, RequestError> {
        let page = page.map(|p| p.to_string());
        let per_page = per_page.map(|p| p.to_string());

        let mut params = Vec::new();
        if let Some(page) = page.as_deref() {
            params.push(("page", page));
        }
        if let Some(per_page) = per_page.as_deref() {
            params.push(("per_page", per_page));
        }

        let nodes: Vec<CloudNode> = self.client.get_as("cloud-nodes", &params).await?;
        info!(count = nodes.len(), "Listed cloud nodes");
        Ok(nodes)
    }
}
