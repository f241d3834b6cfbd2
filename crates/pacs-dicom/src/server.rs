//! DICOM存储监听器（SCP）

use crate::{
    association::{self, ChannelEvent, DimseChannel},
    dimse::{CommandField, CommandSet, DimseMessage, DimseStatus},
    services::{AcceptedContext, ListenerConfig, ListenerHandle, StoreEvent, StoreHandler, StoreInstance},
    transfer_syntax::DEFAULT_TRANSFER_SYNTAXES,
};
use async_trait::async_trait;
use dicom_ul::{
    association::{server::AcceptAny, Association as _},
    Pdu, ServerAssociationOptions,
};
use pacs_core::{sop_class::SopClass, PacsError, Result};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

/// 接受方的协商选项：配置中的抽象语法加上验证服务，传输语法取所有上下文的并集
fn association_options(config: &ListenerConfig) -> ServerAssociationOptions<'static, AcceptAny> {
    let mut options = ServerAssociationOptions::new()
        .accept_any()
        .ae_title(config.ae_title.clone())
        .max_pdu_length(config.max_pdu_length)
        .strict(false)
        .with_abstract_syntax(SopClass::VERIFICATION.uid);
    for context in &config.contexts {
        options = options.with_abstract_syntax(context.abstract_syntax.clone());
    }

    let mut transfer_syntaxes: Vec<String> = Vec::new();
    let configured = config.contexts.iter().flat_map(|context| context.transfer_syntaxes.iter().cloned());
    for ts in configured.chain(DEFAULT_TRANSFER_SYNTAXES.iter().map(|ts| ts.to_string())) {
        if !transfer_syntaxes.contains(&ts) {
            transfer_syntaxes.push(ts);
        }
    }
    for ts in transfer_syntaxes {
        options = options.with_transfer_syntax(ts);
    }
    options
}

/// 后台存储监听器
pub struct StoreListener {
    local_addr: SocketAddr,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl StoreListener {
    /// 绑定端口并在后台开始接受连接
    pub async fn bind(config: ListenerConfig, handler: Arc<dyn StoreHandler>) -> Result<Self> {
        let listener = TcpListener::bind((config.bind_host.as_str(), config.port))
            .await
            .map_err(|e| PacsError::Listener(format!("绑定 {}:{} 失败: {}", config.bind_host, config.port, e)))?;
        let local_addr = listener.local_addr()?;

        info!(
            "存储监听器启动: AE={}, 地址={}, 支持 {} 个上下文",
            config.ae_title,
            local_addr,
            config.contexts.len()
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let options = Arc::new(association_options(&config));
        let task = tokio::spawn(accept_loop(listener, Arc::new(config), options, handler, shutdown_rx));

        Ok(Self {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

#[async_trait]
impl ListenerHandle for StoreListener {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(true).is_err() {
                debug!("监听任务已提前结束: {}", self.local_addr);
            }
        }
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| PacsError::Internal(format!("监听任务异常结束: {}", e)))?;
            info!("存储监听器已停止: {}", self.local_addr);
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: Arc<ListenerConfig>,
    options: Arc<ServerAssociationOptions<'static, AcceptAny>>,
    handler: Arc<dyn StoreHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    debug!("接受连接: {}", remote_addr);
                    let config = Arc::clone(&config);
                    let options = Arc::clone(&options);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, remote_addr, config, options, handler).await {
                            error!("处理来自 {} 的关联失败: {}", remote_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("接受连接失败: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    config: Arc<ListenerConfig>,
    options: Arc<ServerAssociationOptions<'static, AcceptAny>>,
    handler: Arc<dyn StoreHandler>,
) -> Result<()> {
    let server_association = tokio::time::timeout(config.timeouts.dimse, options.establish_async(stream))
        .await
        .map_err(|_| PacsError::Timeout(format!("等待 {} 的关联请求超时", remote_addr)))?
        .map_err(association::ul_error)?;

    let calling_ae_title = server_association.peer_ae_title().trim().to_string();
    let contexts = association::negotiated_contexts(server_association.presentation_contexts());
    let peer_max_pdu_length = server_association.requestor_max_pdu_length();
    info!(
        "接受来自 {} ({}) 的关联, {} 个上下文可用",
        calling_ae_title,
        remote_addr,
        contexts.len()
    );

    let mut channel = DimseChannel::new(server_association, peer_max_pdu_length, config.timeouts.dimse);
    loop {
        match channel.receive().await? {
            ChannelEvent::Message(message) => {
                let status = match message.command.field {
                    CommandField::CEchoRq => DimseStatus::Success,
                    CommandField::CStoreRq => dispatch_store(&message, &contexts, &calling_ae_title, &handler).await,
                    other => {
                        warn!("不支持的命令 0x{:04X} 来自 {}", other.code(), calling_ae_title);
                        continue;
                    }
                };
                let response = CommandSet::response_to(&message.command, status);
                channel.send_message(message.context_id, &response, None).await?;
            }
            ChannelEvent::ReleaseRequested => {
                channel.send_pdu(Pdu::ReleaseRP).await?;
                debug!("{} 释放关联", calling_ae_title);
                break;
            }
            ChannelEvent::Aborted(source) => {
                warn!("{} 中止关联: {:?}", calling_ae_title, source);
                break;
            }
            ChannelEvent::Closed => break,
        }
    }
    Ok(())
}

async fn dispatch_store(
    message: &DimseMessage,
    contexts: &[AcceptedContext],
    calling_ae_title: &str,
    handler: &Arc<dyn StoreHandler>,
) -> DimseStatus {
    let Some(context) = contexts.iter().find(|context| context.id == message.context_id) else {
        warn!("C-STORE 使用了未协商的上下文 {}", message.context_id);
        return DimseStatus::Failure(DimseStatus::SOP_CLASS_NOT_SUPPORTED);
    };
    let Some(data) = &message.data else {
        warn!("C-STORE 请求缺少数据集");
        return DimseStatus::Failure(DimseStatus::PROCESSING_FAILURE);
    };

    let event = StoreEvent {
        instance: StoreInstance {
            sop_class_uid: message
                .command
                .affected_sop_class_uid
                .clone()
                .unwrap_or_else(|| context.abstract_syntax.clone()),
            sop_instance_uid: message.command.affected_sop_instance_uid.clone().unwrap_or_default(),
            transfer_syntax: context.transfer_syntax.clone(),
            data: data.clone(),
        },
        context: context.clone(),
        calling_ae_title: calling_ae_title.to_string(),
    };
    handler.handle_store(event).await
}
