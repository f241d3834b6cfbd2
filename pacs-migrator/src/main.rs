//! PACS迁移工具主程序

use anyhow::Result;
use clap::Parser;
use pacs_admin::{init_logging, ConfigValidator, MigrationConfig};
use pacs_core::EndpointRole;
use pacs_dicom::{AssociationTimeouts, TcpDicomNetwork};
use pacs_migration::{MigrationRunner, MigrationSettings};
use std::{process::ExitCode, sync::Arc, time::Duration};
use tracing::{error, info, warn};

/// 迁移工具命令行参数
#[derive(Parser, Debug)]
#[command(name = "pacs-migrator")]
#[command(about = "把某一检查日期的研究从源PACS迁移到目的PACS")]
struct Args {
    /// 配置文件路径 (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// 检查日期 YYYYMMDD，缺省为当天
    #[arg(short, long)]
    date: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long)]
    log_level: Option<String>,

    /// 只探测和比较，打印迁移计划
    #[arg(long)]
    dry_run: bool,

    /// 打印生效的配置后退出
    #[arg(long)]
    print_config: bool,
}

fn settings_from(config: &MigrationConfig) -> MigrationSettings {
    MigrationSettings {
        source: config.source.endpoint(EndpointRole::Source),
        destination: config.destination.endpoint(EndpointRole::Destination),
        local: config.local.endpoint(EndpointRole::Local),
        study_date: config.migration.study_date.clone(),
        settle_timeout: config.migration.settle_timeout(),
        drain_grace: config.migration.drain_grace(),
        use_completion_signal: config.migration.use_completion_signal,
        context_cap: config.migration.context_cap,
        timeouts: AssociationTimeouts {
            connect: Duration::from_secs(config.network.connect_timeout_secs),
            dimse: Duration::from_secs(config.network.dimse_timeout_secs),
            release: Duration::from_secs(config.network.release_timeout_secs),
        },
        max_pdu_length: config.network.max_pdu_length,
    }
}

async fn run(args: Args) -> Result<bool> {
    let mut config = MigrationConfig::load(args.config.as_deref())?;
    if let Some(date) = args.date {
        config.migration.study_date = Some(date);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    ConfigValidator::new().validate(&config)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(true);
    }

    let _guard = init_logging(&config.logging)?;
    info!("启动PACS迁移工具...");

    let runner = MigrationRunner::new(Arc::new(TcpDicomNetwork), settings_from(&config));

    if args.dry_run {
        let plan = runner.plan().await;
        println!(
            "源端 {} 个研究, 目的端 {} 个, 待迁移 {} 个",
            plan.source_count(),
            plan.destination_count(),
            plan.len()
        );
        for study in plan.studies() {
            println!("  {}", study.summary());
        }
        return Ok(true);
    }

    let interrupted = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听中断信号: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        report = runner.run() => Ok(report.success),
        _ = interrupted => {
            warn!("收到中断信号，停止监听器");
            runner.shutdown().await;
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("错误: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
