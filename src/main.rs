//! Lab Data Sync CLI
//!
//! Syncs a watched data directory into the record database and manages records.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::info;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

use lab_data_sync::config::SyncConfigBuilder;
use lab_data_sync::{
    records, ActionResponse, BatchUploadReport, DownloadBatch, FileInfo, FileLocation, FileRecord,
    RecordDatabase, RecordEdit, RecordInput, RecordStatus, Reconciler, SyncConfig, SyncError,
    SyncReport, UploadOutcome, UploadRequest, UploadedFile,
};

const ABOUT: &str = r#"
Lab Data Sync - keeps lab data file records in step with the data folder

Examples:
  lab_data_sync sync                                 full sync of the data folder
  lab_data_sync sync --incremental --since 2024-05-01T08:00:00Z
  lab_data_sync list --json                          active records as JSON
  lab_data_sync upload ./run42.csv --title "Run 42"  copy a file in and record it
  lab_data_sync locate-many 3 4 7                    files for several records

Environment:
  RAW_DATA_BASE_PATH   base path of the data folder
  ONEDRIVE_BASE_PATH   shared drive base; also locates the shared database
  MAIN_DATABASE_PATH   database file
"#;

#[derive(Parser)]
#[command(name = "lab_data_sync")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Base path of the data folder (overrides the environment)
    #[arg(long, global = true)]
    base_path: Option<PathBuf>,

    /// SQLite database file (overrides the environment)
    #[arg(short = 'd', long, global = true)]
    db: Option<PathBuf>,

    /// Logical folder prefix of synced record paths
    #[arg(long, global = true)]
    prefix: Option<String>,

    /// Print the full response as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the data folder into the database
    Sync {
        /// Only look at files changed since --since
        #[arg(short = 'i', long)]
        incremental: bool,

        /// Watermark for incremental sync (RFC 3339); full sync when omitted
        #[arg(long, requires = "incremental")]
        since: Option<DateTime<Utc>>,
    },
    /// List active records
    List,
    /// Show one record
    Show { id: i64 },
    /// Create a record by hand
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        /// Record path, e.g. test/run1.csv
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        status: Option<RecordStatus>,
    },
    /// Edit a record
    Edit {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        status: Option<RecordStatus>,
    },
    /// Soft-delete a record
    Remove { id: i64 },
    /// Stat a file in the data folder by record path
    Info { relative_path: String },
    /// Resolve a record to its file on disk
    Locate { id: i64 },
    /// Resolve several records to their files
    LocateMany {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Copy a file into the data folder and record it
    Upload {
        file: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Copy several files in, one record each
    UploadMany {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("{}", ABOUT);
        println!("Run 'lab_data_sync --help' for all options");
        return ExitCode::SUCCESS;
    };

    let mut builder = SyncConfigBuilder::from_config(SyncConfig::from_env());
    if let Some(base_path) = cli.base_path {
        builder = builder.base_path(base_path);
    }
    if let Some(db) = cli.db {
        builder = builder.db_path(db);
    }
    if let Some(ref prefix) = cli.prefix {
        builder = builder.prefix(prefix);
    }
    let config = builder.build();
    info!("Data folder: {:?}", config.watched_root());
    info!("Database: {:?}", config.db_path);

    let mut db = match RecordDatabase::open(&config.db_path) {
        Ok(db) => db,
        Err(e) => {
            log::error!("Failed to open database {:?}: {}", config.db_path, e);
            return ExitCode::FAILURE;
        }
    };

    let json = cli.json;
    match command {
        Commands::Sync { incremental, since } => {
            let mut reconciler = Reconciler::new(db, config);
            let response = if incremental {
                reconciler.incremental_sync_response(since)
            } else {
                reconciler.full_sync_response()
            };
            emit(&response, json, print_report)
        }
        Commands::List => {
            let response = ActionResponse::from_result(
                records::list_records(&db),
                "Failed to fetch data management records",
            );
            emit(&response, json, |records: &Vec<FileRecord>| {
                for record in records {
                    print_record(record);
                }
            })
        }
        Commands::Show { id } => {
            let response =
                ActionResponse::from_result(records::get_record(&db, id), "Failed to fetch record");
            emit(&response, json, print_record)
        }
        Commands::Add {
            title,
            description,
            path,
            status,
        } => {
            let input = RecordInput {
                title,
                description,
                relative_path: path,
                status,
            };
            let response = ActionResponse::from_result(
                records::create_record(&mut db, input),
                "Failed to create data management record",
            );
            emit(&response, json, print_record)
        }
        Commands::Edit {
            id,
            title,
            description,
            path,
            status,
        } => {
            let edit = RecordEdit {
                title,
                description,
                relative_path: path,
                status,
            };
            let response = ActionResponse::from_result(
                records::update_record(&mut db, id, edit),
                "Failed to update data management record",
            );
            emit(&response, json, print_record)
        }
        Commands::Remove { id } => {
            let response = ActionResponse::from_result(
                records::delete_record(&mut db, id),
                "Failed to delete data management record",
            );
            emit(&response, json, print_record)
        }
        Commands::Info { relative_path } => {
            let response = ActionResponse::from_result(
                records::file_info(&config, &relative_path),
                "Failed to get file info",
            );
            emit(&response, json, |info: &FileInfo| {
                println!("{}", info.path.display());
                println!("  Size: {} bytes", info.size);
                println!("  Modified: {}", info.modified.to_rfc3339());
            })
        }
        Commands::Locate { id } => {
            let response = ActionResponse::from_result(
                records::locate_record_file(&db, &config, id),
                "Failed to locate file",
            );
            emit(&response, json, |location: &FileLocation| {
                println!("{}", location.full_path.display());
                println!("  Name: {}", location.file_name);
                println!("  Size: {} bytes", location.file_size);
            })
        }
        Commands::LocateMany { ids } => {
            let response = ActionResponse::from_result(
                records::locate_record_files(&db, &config, &ids),
                "Failed to download files",
            );
            emit(&response, json, |batch: &DownloadBatch| {
                for location in &batch.files {
                    println!("{}  ({} bytes)", location.full_path.display(), location.file_size);
                }
                println!("Total: {} bytes", batch.total_size);
                for missing in &batch.missing_files {
                    println!("Missing: {}", missing);
                }
            })
        }
        Commands::UploadMany { files } => {
            let mut requests = Vec::new();
            let mut unreadable = Vec::new();
            for path in &files {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                match std::fs::read(path) {
                    Ok(contents) => requests.push(UploadRequest { name, contents }),
                    Err(e) => {
                        log::error!("Failed to read {:?}: {}", path, e);
                        unreadable.push(name);
                    }
                }
            }

            let result = if requests.is_empty() {
                Ok(BatchUploadReport::default())
            } else {
                records::upload_files(&mut db, &config, requests)
            };
            let result = result.map(|mut report| {
                for name in unreadable {
                    report.push(UploadOutcome::failed(name));
                }
                report.finish();
                report
            });
            let response = ActionResponse::from_result(result, "Failed to upload files");
            emit(&response, json, |report: &BatchUploadReport| {
                for outcome in &report.results {
                    match (&outcome.file_name, &outcome.error) {
                        (Some(stored), _) => {
                            println!("{} -> {}", outcome.original_name, stored)
                        }
                        (None, error) => println!(
                            "{}: {}",
                            outcome.original_name,
                            error.as_deref().unwrap_or("failed")
                        ),
                    }
                }
                println!(
                    "{} of {} files uploaded",
                    report.summary.successful, report.summary.total
                );
            })
        }
        Commands::Upload {
            file,
            title,
            description,
        } => {
            let result = std::fs::read(&file)
                .map_err(SyncError::from)
                .and_then(|contents| {
                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    records::upload_file(&mut db, &config, &name, &contents, title, description)
                });
            let response = ActionResponse::from_result(result, "Failed to upload file");
            emit(&response, json, |uploaded: &UploadedFile| {
                println!("Stored as {}", uploaded.file_name);
                print_record(&uploaded.record);
            })
        }
    }
}

/// Print a response and turn it into an exit code
fn emit<T, F>(response: &ActionResponse<T>, json: bool, print: F) -> ExitCode
where
    T: Serialize,
    F: FnOnce(&T),
{
    if json {
        match serde_json::to_string_pretty(response) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                log::error!("Failed to serialize response: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else if let Some(ref data) = response.data {
        print(data);
    } else if let Some(ref error) = response.error {
        eprintln!("Error: {}", error);
    }

    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_report(report: &SyncReport) {
    println!("Sync completed ({:?}):", report.mode);
    println!("  Total files: {}", report.summary.total);
    println!("  Created: {}", report.summary.created);
    println!("  Updated: {}", report.summary.updated);
    println!("  Deleted: {}", report.summary.deleted);
    if let Some(unchanged) = report.summary.unchanged {
        println!("  Unchanged: {}", unchanged);
    }
    println!("  Duration: {}ms", report.duration_ms);
}

fn print_record(record: &FileRecord) {
    println!(
        "#{} {} [{}{}] {}",
        record.id,
        record.title,
        record.status,
        if record.is_active { "" } else { ", hidden" },
        record.relative_path.as_deref().unwrap_or("-"),
    );
}
