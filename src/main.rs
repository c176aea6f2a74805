//! WeRead 电子书抓取与 EPUB 打包工具。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/诊断上报等基础设施
//! - `rdata`：中间格式 `.rdata.zip` 的数据模型与读写
//! - `download`：抓取流程编排（切换章节、取回内容、下载图片）
//! - `book_parser`：章节规范化、清单生成、EPUB 打包、完整性检查

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::error;

mod base_system;
mod book_parser;
mod download;
mod rdata;

use base_system::config::load_or_create_with_base;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use base_system::report::TracingReporter;
use book_parser::epub_writer::{self, PackageError, PackageOptions};
use book_parser::integrity;
use download::extractor::{self, ExtractError, ExtractOptions};
use download::fetcher::HttpFetcher;
use download::source::SnapshotSource;
use rdata::ArchiveError;

const VERSION: &str = env!("CARGO_PKG_VERSION");

const EXIT_CODES: &str = "\
退出码:
  0   成功
  1   完整性检查发现缺失
  2   命令行参数错误
  3   原始数据文件不存在
  4   文件不是有效的 zip
  5   content.json / toc.json 缺失或格式错误
  6   书库中没有找到该书名
  7   打包时章节无法解析
  10  其它错误（IO、网络初始化、配置）";

#[derive(Debug, Parser)]
#[command(name = "weread-cli")]
#[command(about = "WeRead 电子书下载与 EPUB 打包")]
#[command(after_help = EXIT_CODES)]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs）
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 按书名抓取整本书，保存为 <书名>.rdata.zip
    Download {
        /// 逐章输出进度（不显示进度条）
        #[arg(short, long)]
        verbose: bool,
        /// 书名，按子串匹配
        name: String,
        /// 已录制的阅读器状态目录
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// 检查原始数据文件是否缺少章节或图片
    Check {
        /// 逐条列出缺失项
        #[arg(short, long)]
        verbose: bool,
        rdata: PathBuf,
    },
    /// 由原始数据文件生成 EPUB
    Generate {
        /// 控制台输出调试日志，并列出导航中省略的章节
        #[arg(short, long)]
        verbose: bool,
        rdata: PathBuf,
        /// 输出路径，缺省为输入旁的同名 .epub
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 显示版本信息
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Command::Version) {
        println!("weread-cli v{VERSION}");
        return ExitCode::SUCCESS;
    }

    let data_dir = cli.data_dir.as_deref();
    let console_debug = cli.debug || matches!(cli.command, Command::Generate { verbose: true, .. });
    let _log = match init_logging(console_debug, data_dir) {
        Ok(log) => Some(log),
        Err(err) => {
            eprintln!("日志初始化失败: {err:#}");
            None
        }
    };

    match run(cli.command, data_dir) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(exit_code_of(&err))
        }
    }
}

fn run(command: Command, data_dir: Option<&Path>) -> Result<ExitCode> {
    let config = load_or_create_with_base::<Config>(None, data_dir).context("加载配置失败")?;
    let reporter = TracingReporter;

    match command {
        Command::Download {
            verbose,
            name,
            snapshot,
        } => {
            let options = ExtractOptions {
                save_dir: config.default_save_dir(),
                settle_delay: config.settle_delay(),
                verbose,
                allow_overwrite: config.allow_overwrite_files,
            };
            let fetcher = HttpFetcher::new(config.request_timeout(), config.connect_timeout())
                .context("初始化 HTTP 客户端失败")?;
            let mut source = SnapshotSource::new(snapshot);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("创建 tokio runtime 失败")?;
            let (path, summary) = runtime.block_on(extractor::download(
                &mut source,
                &fetcher,
                &name,
                &options,
                &reporter,
            ))?;

            println!(
                "已保存 {}：章节 {} 成功 / {} 缺失，图片 {} 成功 / {} 失败",
                path.display(),
                summary.chapters_saved,
                summary.chapters_missing,
                summary.assets_saved,
                summary.assets_failed
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { verbose, rdata } => {
            let report = integrity::check(&rdata, verbose, &reporter)
                .with_context(|| format!("检查 {} 失败", rdata.display()))?;
            println!(
                "共检查 {} 章：缺失章节 {}，无法解析 {}，缺失图片 {}",
                report.chapters_checked,
                report.missing_chapters.len(),
                report.unreadable_chapters.len(),
                report.missing_images.len()
            );
            if report.is_complete() {
                println!("{} 完整", rdata.display());
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{} 不完整", rdata.display());
                Ok(ExitCode::from(1))
            }
        }
        Command::Generate {
            verbose,
            rdata,
            output,
        } => {
            let options = PackageOptions {
                language: config.book_language.clone(),
                allow_overwrite: config.allow_overwrite_files,
                verbose,
            };
            let written = epub_writer::generate(&rdata, output.as_deref(), &options, &reporter)
                .with_context(|| format!("由 {} 生成 EPUB 失败", rdata.display()))?;
            println!("已生成 {}", written.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Version => Ok(ExitCode::SUCCESS),
    }
}

/// 按错误类型映射退出码，见 `--help`。
fn exit_code_of(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<ArchiveError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<PackageError>() {
        return e.exit_code();
    }
    if let Some(e) = err.downcast_ref::<ExtractError>() {
        return e.exit_code();
    }
    10
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        base_dir: base_dir.map(Path::to_path_buf),
    };
    LogSystem::init(opts).context("初始化日志系统失败")
}
