use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ksau_rust::config::{AppConfig, DEFAULT_CONFIG_PATH};
use ksau_rust::logging;
use ksau_rust::uploader::{
    chunk_size_from_mb, format_bytes, validate_chunk_size_mb, BatchReport, BatchRequest,
    FileReport, FolderScanner, NoopProgress, ProgressSink, ScanOptions, UploadTaskStatus,
};
use ksau_rust::{
    hash_file, CachedTokenProvider, ConsoleProgress, EngineOptions, GraphClient,
    KsauTokenProvider, TokenProvider, UploadEngine, UploadManager, UploadTarget,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "ksau-rust", version, about = "分片上传本地文件到 Microsoft Graph 网盘")]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// 不计算 QuickXor 摘要
    #[arg(long, global = true)]
    no_hash: bool,
    /// 同一 remote 的文件共享一次令牌请求
    #[arg(long, global = true)]
    share_credentials: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 上传单个文件
    Upload(UploadArgs),
    /// 批量上传文件和文件夹
    Batch(BatchArgs),
    /// 计算本地文件的 QuickXor 摘要
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// 列出可用的 remote
    Remotes,
}

#[derive(Args, Debug)]
struct UploadArgs {
    /// 本地文件
    file: PathBuf,
    /// 远程目录（相对于上传根目录）
    remote_path: String,
    /// remote 标识
    remote: String,
    /// 分片大小 (MB, 1-60)
    chunk_size: Option<u64>,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// remote 标识
    #[arg(long)]
    remote: String,
    /// 远程目录（相对于上传根目录）
    #[arg(long, default_value = "")]
    remote_path: String,
    /// 分片大小 (MB, 1-60)
    #[arg(long)]
    chunk_size: Option<u64>,
    /// 同时上传的文件数
    #[arg(long)]
    concurrency: Option<usize>,
    /// 跳过隐藏文件
    #[arg(long)]
    skip_hidden: bool,
    /// 以 JSON 输出结果
    #[arg(long)]
    json: bool,
    /// 文件或文件夹
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            1
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let mut config = AppConfig::load_or_default(&cli.config).await;
    if cli.no_hash {
        config.upload.compute_hash = false;
    }
    if cli.share_credentials {
        config.upload.share_credentials = true;
    }

    // 日志守卫在 run 返回时释放，确保文件日志写完
    let _log_guard = logging::init_logging(&config.log);
    info!("ksau-rust v{} 启动", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Upload(args) => upload(&config, args).await,
        Command::Batch(args) => batch(&config, args).await,
        Command::Hash { files } => hash(&files).await,
        Command::Remotes => {
            for remote in &config.remotes {
                println!("{}", remote);
            }
            Ok(0)
        }
    }
}

/// 组装上传管理器，并把 Ctrl+C 接到根取消令牌上
fn build_manager(config: &AppConfig, max_concurrent_tasks: usize) -> Result<UploadManager> {
    let graph = Arc::new(GraphClient::new(&config.graph)?);

    let mut token_provider: Arc<dyn TokenProvider> =
        Arc::new(KsauTokenProvider::new(&config.token)?);
    if config.upload.share_credentials {
        token_provider = Arc::new(CachedTokenProvider::new(token_provider));
    }

    let engine = UploadEngine::new(
        token_provider,
        graph.clone(),
        graph,
        EngineOptions {
            compute_hash: config.upload.compute_hash,
            max_retries: config.upload.max_retries,
            remotes: config.remotes.clone(),
        },
    );
    let manager = UploadManager::new(Arc::new(engine), max_concurrent_tasks);

    let cancel_token = manager.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消上传");
            cancel_token.cancel();
        }
    });

    Ok(manager)
}

/// 命令行参数优先，否则使用配置（加载时已校验）
fn resolve_chunk_size(config: &AppConfig, chunk_size_mb: Option<u64>) -> Result<u64> {
    match chunk_size_mb {
        Some(chunk_size_mb) => {
            validate_chunk_size_mb(chunk_size_mb).map_err(|e| anyhow::anyhow!(e))?;
            Ok(chunk_size_from_mb(chunk_size_mb))
        }
        None => Ok(config.upload.chunk_size_bytes()),
    }
}

/// 在扫描文件和请求令牌之前拒绝未配置的 remote
fn ensure_known_remote(config: &AppConfig, remote: &str) -> Result<()> {
    if !config.is_known_remote(remote) {
        anyhow::bail!(
            "未知的 remote: {}（可用: {}）",
            remote,
            config.remotes.join(", ")
        );
    }
    Ok(())
}

fn exit_code_for(status: UploadTaskStatus) -> i32 {
    match status {
        UploadTaskStatus::Completed => 0,
        UploadTaskStatus::Aborted => 130,
        _ => 1,
    }
}

async fn upload(config: &AppConfig, args: UploadArgs) -> Result<i32> {
    ensure_known_remote(config, &args.remote)?;
    let chunk_size = resolve_chunk_size(config, args.chunk_size)?;

    if !args.file.is_file() {
        anyhow::bail!("文件不存在或不是普通文件: {}", args.file.display());
    }
    let local_path = dunce::canonicalize(&args.file)
        .with_context(|| format!("无法解析路径: {}", args.file.display()))?;

    let manager = build_manager(config, 1)?;
    let progress = Arc::new(ConsoleProgress::new());
    let report = manager
        .upload_file(
            UploadTarget::new(args.remote, args.remote_path, local_path, chunk_size),
            progress.clone(),
        )
        .await;
    progress.finish_all();

    print_file_report(&report);
    Ok(exit_code_for(report.status))
}

async fn batch(config: &AppConfig, args: BatchArgs) -> Result<i32> {
    ensure_known_remote(config, &args.remote)?;
    let chunk_size = resolve_chunk_size(config, args.chunk_size)?;

    let scanner = FolderScanner::with_options(ScanOptions {
        skip_hidden: args.skip_hidden || config.upload.skip_hidden_files,
    });
    let entries = scanner.collect_entries(&args.paths)?;

    let concurrency = args
        .concurrency
        .unwrap_or(config.upload.max_concurrent_tasks)
        .max(1);
    let manager = build_manager(config, concurrency)?;

    let console = (!args.json).then(|| Arc::new(ConsoleProgress::new()));
    let sink: Arc<dyn ProgressSink> = match &console {
        Some(console) => console.clone() as Arc<dyn ProgressSink>,
        None => Arc::new(NoopProgress),
    };

    let report = manager
        .upload_batch(
            BatchRequest {
                remote: args.remote,
                remote_dir: args.remote_path,
                entries,
                chunk_size,
            },
            sink,
        )
        .await;

    if let Some(console) = &console {
        console.finish_all();
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("序列化上传结果失败")?
        );
    } else {
        print_batch_report(&report);
    }

    Ok(report.exit_code())
}

async fn hash(files: &[PathBuf]) -> Result<i32> {
    let mut code = 0;
    for file in files {
        match hash_file(file).await {
            Ok(digest) => println!("{}  {}", digest, file.display()),
            Err(e) => {
                eprintln!("错误: {}", e);
                code = 1;
            }
        }
    }
    Ok(code)
}

fn print_file_report(report: &FileReport) {
    match report.status {
        UploadTaskStatus::Completed => {
            println!("✓ 上传完成: {}", report.local_path.display());
            if let Some(url) = &report.download_url {
                println!("  下载地址: {}", url);
            }
            println!("  大小: {}", format_bytes(report.size));
            if let Some(digest) = &report.digest {
                let verified = match report.hash_verified {
                    Some(true) => " (已与服务端校验)",
                    Some(false) => " (与服务端不一致)",
                    None => "",
                };
                println!("  QuickXor: {}{}", digest, verified);
            }
        }
        UploadTaskStatus::Aborted => {
            eprintln!("✗ 已取消: {}", report.local_path.display());
        }
        _ => {
            let kind = report
                .error_kind
                .map(|k| k.as_str())
                .unwrap_or("Error");
            eprintln!(
                "✗ 上传失败: {} [{}] {}",
                report.local_path.display(),
                kind,
                report.error.as_deref().unwrap_or("")
            );
        }
    }
}

fn print_batch_report(report: &BatchReport) {
    for file in &report.files {
        print_file_report(file);
    }
    println!(
        "\n共 {} 个文件: 完成 {}, 失败 {}, 取消 {}",
        report.files.len(),
        report.completed_count(),
        report.failed_count(),
        report.aborted_count()
    );
}
