//! claimflow - 保险文档处理
//!
//! 用法：`claimflow [--config <file>] <document>...`
//! 入口：初始化日志与配置，装配引擎与内置 Agent，提交命令行给出的文档，
//! 等每个文档停在 completed / human_review / error 后输出最终状态（JSON），然后优雅关闭。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use claimflow::agent::InMemoryReviewQueue;
use claimflow::config::load_config;
use claimflow::core::{
    run_with_graceful_shutdown, Document, DocumentId, DocumentSource, EngineBuilder,
    EngineCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason,
};
use claimflow::CoordinationEngine;

struct Args {
    config: Option<PathBuf>,
    files: Vec<PathBuf>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut files = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config = Some(PathBuf::from(path));
            }
            _ => files.push(PathBuf::from(arg)),
        }
    }
    Ok(Args { config, files })
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tif" | "tiff" => "image/tiff",
        "txt" | "text" => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn submit_file(engine: &CoordinationEngine, path: &Path) -> anyhow::Result<DocumentId> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let document = Document::new(file_name, guess_mime(path))
        .with_source(DocumentSource::Upload)
        .with_content(content);
    let id = engine.submit(document, None).await?;
    Ok(id)
}

/// 文档停在 completed / human_review / error 且没有在途步骤
async fn wait_settled(engine: &CoordinationEngine, id: &str) {
    loop {
        if let Some(state) = engine.status(id).await {
            let settled = state.current_stage.is_terminal() || state.current_stage.is_escape();
            if settled && !engine.is_pending(id) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn process_all(engine: CoordinationEngine, files: Vec<PathBuf>) {
    let mut ids = Vec::new();
    for path in &files {
        match submit_file(&engine, path).await {
            Ok(id) => ids.push(id),
            Err(e) => tracing::error!("{:#}", e),
        }
    }

    for id in &ids {
        wait_settled(&engine, id).await;
        if let Some(state) = engine.status(id).await {
            match serde_json::to_string_pretty(&state) {
                Ok(json) => println!("{json}"),
                Err(e) => tracing::error!(document_id = %id, "Failed to serialize state: {}", e),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    claimflow::observability::init();

    let args = parse_args()?;
    let app = load_config(args.config.clone()).context("Failed to load config")?;

    let (review_queue, mut review_rx) = InMemoryReviewQueue::new();
    tokio::spawn(async move {
        while let Some(request) = review_rx.recv().await {
            tracing::info!(
                ticket = %request.ticket,
                document_id = %request.document_id,
                reason = %request.reason,
                "Review requested"
            );
        }
    });

    let engine = EngineBuilder::from_app(&app)?
        .with_builtin_agents(&app, Arc::new(review_queue))?
        .build()
        .await;
    let monitor = engine.spawn_monitor();

    if args.files.is_empty() {
        tracing::warn!("No documents given; usage: claimflow [--config <file>] <document>...");
    }

    let manager = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&manager));
    coordinator.register(EngineCleanup::new(engine.clone()));

    let drained = Arc::clone(&manager);
    run_with_graceful_shutdown(
        Arc::clone(&manager),
        async move {
            process_all(engine, args.files).await;
            drained.shutdown(ShutdownReason::Drained);
        },
        || async move {
            coordinator.run_cleanup().await;
            let _ = monitor.await;
        },
    )
    .await;

    Ok(())
}
