// ==========================================
// 批量导入导出管道 - 命令行入口
// ==========================================
// 子命令: import / validate / export / rollback / jobs
// ==========================================

use anyhow::{bail, Context};
use bulk_io::api::{ApiError, ImportOptions, ImportRequest};
use bulk_io::app::{get_default_db_path, AppState};
use bulk_io::domain::{DuplicateHandling, JobKind, Module, ValidationResult};
use bulk_io::logging;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bulk-io", version, about = "业务数据 CSV 批量导入导出")]
struct Cli {
    /// 数据库文件路径
    #[arg(long, env = "BULK_IO_DB_PATH", global = true)]
    db: Option<String>,

    /// 以 JSON 格式输出日志
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 导入 CSV 文件（自动映射表头）
    Import {
        module: Module,
        file: PathBuf,
        /// 重复处理策略: skip / update / merge / create_new
        #[arg(long)]
        policy: Option<DuplicateHandling>,
        /// 使用的导入模板 id
        #[arg(long)]
        template: Option<String>,
        /// 分隔符（默认自动识别）
        #[arg(long)]
        delimiter: Option<char>,
    },
    /// 只校验不导入
    Validate {
        module: Module,
        file: PathBuf,
        #[arg(long)]
        template: Option<String>,
    },
    /// 导出模块记录为 CSV（fields 以逗号分隔，* 表示全部字段）
    Export {
        module: Module,
        fields: String,
        out: PathBuf,
    },
    /// 回滚导入任务
    Rollback { job_id: String },
    /// 列出最近的任务
    Jobs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let db_path = cli.db.unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);
    let state = AppState::new(db_path).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Import {
            module,
            file,
            policy,
            template,
            delimiter,
        } => {
            let delimiter = match delimiter {
                Some(c) if c.is_ascii() => Some(c as u8),
                Some(c) => bail!("分隔符必须是 ASCII 字符: {:?}", c),
                None => None,
            };
            let raw = std::fs::read(&file).with_context(|| format!("无法读取 {}", file.display()))?;
            let request = ImportRequest {
                module,
                file_name: file_name_of(&file),
                raw,
                mappings: Vec::new(),
                options: ImportOptions {
                    delimiter,
                    template_id: template,
                    duplicate_handling: policy,
                    ..ImportOptions::default()
                },
            };
            match state.import_api.import_and_wait(request).await {
                Ok(job) => {
                    println!(
                        "任务 {} {}: 导入 {} 行，跳过 {} 行，失败 {} 行",
                        job.id, job.status, job.rows_imported, job.rows_skipped, job.rows_failed
                    );
                    for e in &job.errors {
                        println!("  第 {} 行 {}: {}", e.row, e.column.as_deref().unwrap_or("-"), e.message);
                    }
                }
                Err(ApiError::ValidationFailed(result)) => {
                    print_issues(&result);
                    bail!("数据校验未通过，未导入任何数据");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Validate {
            module,
            file,
            template,
        } => {
            let raw = std::fs::read(&file).with_context(|| format!("无法读取 {}", file.display()))?;
            let options = ImportOptions {
                template_id: template,
                ..ImportOptions::default()
            };
            let result = state
                .import_api
                .validate(&raw, Vec::new(), module, &options)
                .await?;
            print_issues(&result);
            println!(
                "{} 行 {} 列: {} 个错误, {} 个警告",
                result.row_count,
                result.column_count,
                result.error_count(),
                result.warning_count()
            );
        }
        Command::Export {
            module,
            fields,
            out,
        } => {
            let fields: Vec<String> = fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty() && *f != "*")
                .map(str::to_string)
                .collect();
            let options = state.export_api.default_options().await?;
            let output = state.export_api.export(module, &fields, &options).await?;
            std::fs::write(&out, &output.bytes).with_context(|| format!("无法写入 {}", out.display()))?;
            for w in &output.warnings {
                println!("  {}", w);
            }
            println!("已导出 {} 条记录到 {}", output.record_count, out.display());
        }
        Command::Rollback { job_id } => {
            let job = state.import_api.rollback(&job_id).await?;
            println!("任务 {} 已回滚（{}）", job.id, job.status);
        }
        Command::Jobs { limit } => {
            for job in state.import_api.list_jobs(None, limit)? {
                match job {
                    JobKind::Import(j) => println!(
                        "import {} {} {} {:>5.1}% {}",
                        j.id,
                        j.module,
                        j.status,
                        j.progress() * 100.0,
                        j.file_name
                    ),
                    JobKind::Export(j) => println!(
                        "export {} {} {} {} {}",
                        j.id,
                        j.module,
                        j.status,
                        j.rows_exported,
                        j.file_url.as_deref().unwrap_or("-")
                    ),
                }
            }
        }
    }

    Ok(())
}

fn file_name_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_issues(result: &ValidationResult) {
    for issue in &result.issues {
        let row = issue
            .row
            .map(|r| r.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("  [{}] 第 {} 行 {}: {}", issue.severity, row, issue.column, issue.message);
    }
}
