//! 基于TCP的 `DicomNetwork` 实现

use crate::{
    client::ClientAssociation,
    server::StoreListener,
    services::{Association, AssociationRequest, DicomNetwork, ListenerConfig, ListenerHandle, StoreHandler},
};
use async_trait::async_trait;
use pacs_core::Result;
use std::sync::Arc;

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDicomNetwork;

#[async_trait]
impl DicomNetwork for TcpDicomNetwork {
    async fn associate(&self, request: AssociationRequest) -> Result<Box<dyn Association>> {
        let association = ClientAssociation::connect(request).await?;
        Ok(Box::new(association))
    }

    async fn start_listener(
        &self,
        config: ListenerConfig,
        handler: Arc<dyn StoreHandler>,
    ) -> Result<Box<dyn ListenerHandle>> {
        let listener = StoreListener::bind(config, handler).await?;
        Ok(Box::new(listener))
    }
}
