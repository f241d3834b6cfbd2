//! 存储监听器生命周期管理

use crate::context_catalog::ContextCatalog;
use pacs_core::{sop_class::SopClass, Endpoint, PacsError, Result};
use pacs_dicom::{
    transfer_syntax::transfer_syntax_uids::EXPLICIT_VR_LITTLE_ENDIAN, AssociationTimeouts, ContextRequest,
    DicomNetwork, ListenerConfig, ListenerHandle, StoreHandler,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub struct ListenerManager {
    network: Arc<dyn DicomNetwork>,
    handler: Arc<dyn StoreHandler>,
    config: ListenerConfig,
    handle: Mutex<Option<Box<dyn ListenerHandle>>>,
}

impl ListenerManager {
    pub fn new(
        network: Arc<dyn DicomNetwork>,
        handler: Arc<dyn StoreHandler>,
        local: &Endpoint,
        catalog: &ContextCatalog,
        timeouts: AssociationTimeouts,
        max_pdu_length: u32,
    ) -> Self {
        let mut contexts = catalog.contexts();
        // 基线存储类与传输语法组合始终可用
        contexts.push(ContextRequest::new(SopClass::CT_IMAGE.uid, &[EXPLICIT_VR_LITTLE_ENDIAN]));

        Self {
            network,
            handler,
            config: ListenerConfig {
                ae_title: local.ae_title.clone(),
                bind_host: local.host.clone(),
                port: local.port,
                contexts,
                max_pdu_length,
                timeouts,
            },
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// 启动后台监听；已在运行时立即失败
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut handle = self.handle.lock().await;
        if let Some(running) = handle.as_ref() {
            return Err(PacsError::Listener(format!("监听器已在 {} 运行", running.local_addr())));
        }

        let listener = self
            .network
            .start_listener(self.config.clone(), Arc::clone(&self.handler))
            .await?;
        let addr = listener.local_addr();
        info!("监听器已启动: {} @ {}", self.config.ae_title, addr);
        *handle = Some(listener);
        Ok(addr)
    }

    /// 停止监听；未启动或重复调用时不做任何事
    pub async fn stop(&self) {
        let running = self.handle.lock().await.take();
        if let Some(mut listener) = running {
            if let Err(e) = listener.shutdown().await {
                warn!("停止监听器时出错: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }
}
