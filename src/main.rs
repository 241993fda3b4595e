use std::fs::File;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::json;

use kiosk_lib::config;
use kiosk_lib::db::backup::CreateOptions;
use kiosk_lib::db::health::{DbHealthReport, DbHealthStatus};
use kiosk_lib::import::write_import_report;
use kiosk_lib::search::{
    FieldWeight, PageRequest, QueryMode, QueryOptions, SearchFilters, SortDirection, SortField,
    TagMatch,
};
use kiosk_lib::{Engine, EntityKind, ImportMode};

#[derive(Debug, Parser)]
#[command(name = "kiosk", about = "Archive kiosk search and data engine", version)]
struct Cli {
    /// Database file; defaults to the kiosk data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ranked search across one or every entity kind.
    Search(SearchArgs),
    /// Records resembling an existing one.
    Similar {
        kind: EntityKind,
        id: i64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Autocomplete candidates for a prefix.
    Suggest {
        prefix: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Load a CSV file into one entity kind.
    Import {
        kind: EntityKind,
        csv: PathBuf,
        #[arg(long, default_value_t = ImportMode::Replace)]
        mode: ImportMode,
        /// Write a JSON report into this directory.
        #[arg(long)]
        report_dir: Option<PathBuf>,
    },
    /// Store maintenance and inspection commands.
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Args)]
struct SearchArgs {
    text: String,
    /// Read `and`, `or` and `not` as operators.
    #[arg(long)]
    boolean: bool,
    /// Search only this column, optionally boosted as `column=weight`
    /// (repeatable).
    #[arg(long = "field")]
    fields: Vec<FieldWeight>,
    /// Restrict to these kinds (repeatable).
    #[arg(long = "kind")]
    kinds: Vec<EntityKind>,
    #[arg(long)]
    year_start: Option<i32>,
    #[arg(long)]
    year_end: Option<i32>,
    #[arg(long)]
    decade: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    department: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    /// Match any tag instead of all of them.
    #[arg(long)]
    any_tag: bool,
    #[arg(long, value_enum, default_value_t = SortArg::Relevance)]
    sort: SortArg,
    #[arg(long)]
    asc: bool,
    #[arg(long, default_value_t = 1)]
    page: usize,
    #[arg(long, default_value_t = 20)]
    page_size: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Relevance,
    Title,
    Date,
    Year,
}

impl From<SortArg> for SortField {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Relevance => SortField::Relevance,
            SortArg::Title => SortField::Title,
            SortArg::Date => SortField::Date,
            SortArg::Year => SortField::Year,
        }
    }
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Run the store health checks and print the report.
    Status,
    /// Rebuild text indexes (every kind unless given).
    Rebuild { kinds: Vec<EntityKind> },
    /// Merge index segments.
    Optimize { kinds: Vec<EntityKind> },
    /// Recreate any index that fails its health probe.
    Repair,
    /// Take a manual snapshot.
    Backup {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// List snapshots, newest first.
    Backups,
    /// Overwrite the store with a snapshot.
    Restore { id: String },
    /// Check that a snapshot is readable.
    Verify { id: String },
    /// Remove a snapshot.
    Delete { id: String },
}

fn main() {
    let _log_guard = kiosk_lib::init_logging(Some(config::data_dir().join("logs").as_path()));

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let Cli { db, command } = cli;
    let db_path = db.unwrap_or_else(config::default_db_path);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;

    runtime.block_on(async move {
        let engine = Engine::open(&db_path)
            .await
            .with_context(|| format!("open store at {}", db_path.display()))?;
        let result = dispatch(&engine, command).await;
        engine.close().await;
        result
    })
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<i32> {
    match command {
        Commands::Search(args) => {
            let request = args.into_request();
            let page = engine.search().search_page(&request).await;
            print_json(&page)?;
            Ok(0)
        }
        Commands::Similar { kind, id, limit } => {
            let hits = engine.search().similar_to(kind, id, limit).await;
            print_json(&hits)?;
            Ok(0)
        }
        Commands::Suggest { prefix, limit } => {
            let suggestions = engine.search().suggest(&prefix, limit).await;
            print_json(&suggestions)?;
            Ok(0)
        }
        Commands::Import {
            kind,
            csv,
            mode,
            report_dir,
        } => {
            let file = File::open(&csv).with_context(|| format!("open {}", csv.display()))?;
            let result = engine.imports().import_csv(kind, file, mode).await;
            if let Some(dir) = report_dir {
                let path = write_import_report(&dir, Some(csv.as_path()), &result)?;
                eprintln!("Report written to {}", path.display());
            }
            print_json(&result)?;
            Ok(if result.success { 0 } else { 1 })
        }
        Commands::Db(command) => handle_db_command(engine, command).await,
    }
}

async fn handle_db_command(engine: &Engine, command: DbCommand) -> Result<i32> {
    let index = engine.search().index();
    match command {
        DbCommand::Status => {
            let report = engine.health().await.context("run database health checks")?;
            print_json(&report)?;
            Ok(status_code(&report))
        }
        DbCommand::Rebuild { kinds } => {
            let kinds = EntityKind::resolve(Some(kinds.as_slice()));
            index.rebuild(Some(kinds.as_slice())).await.context("rebuild text indexes")?;
            engine.search().clear_cache();
            print_json(&index.verify_integrity().await)?;
            Ok(0)
        }
        DbCommand::Optimize { kinds } => {
            let kinds = EntityKind::resolve(Some(kinds.as_slice()));
            let report = index.optimize(Some(kinds.as_slice())).await;
            print_json(&report)?;
            Ok(if report.success { 0 } else { 1 })
        }
        DbCommand::Repair => {
            let repaired = engine.search().recover().await;
            print_json(&json!({
                "repaired": repaired,
                "status": engine.search().status(),
            }))?;
            Ok(0)
        }
        DbCommand::Backup { name, description } => {
            let opts = CreateOptions {
                description,
                ..CreateOptions::default()
            };
            let id = engine
                .backups()
                .create(name.as_deref(), opts)
                .await
                .context("create database backup")?;
            let info = engine.backups().get_info(&id).await?;
            print_json(&json!({ "id": id, "backup": info }))?;
            Ok(0)
        }
        DbCommand::Backups => {
            print_json(&engine.backups().list().await.context("list backups")?)?;
            Ok(0)
        }
        DbCommand::Restore { id } => {
            let outcome = engine
                .restore_backup(&id)
                .await
                .with_context(|| format!("restore backup {id}"))?;
            print_json(&outcome)?;
            Ok(0)
        }
        DbCommand::Verify { id } => {
            let ok = engine
                .backups()
                .verify(&id)
                .await
                .with_context(|| format!("verify backup {id}"))?;
            print_json(&json!({ "id": id, "valid": ok }))?;
            Ok(if ok { 0 } else { 1 })
        }
        DbCommand::Delete { id } => {
            engine
                .backups()
                .delete(&id)
                .await
                .with_context(|| format!("delete backup {id}"))?;
            print_json(&json!({ "deleted": id }))?;
            Ok(0)
        }
    }
}

impl SearchArgs {
    fn into_request(self) -> PageRequest {
        let mut filters = SearchFilters {
            decade: self.decade,
            category: self.category,
            department: self.department,
            tags: self.tags,
            tag_match: if self.any_tag {
                TagMatch::Any
            } else {
                TagMatch::All
            },
            ..SearchFilters::default()
        };
        match (self.year_start, self.year_end) {
            (Some(start), Some(end)) => filters = filters.with_year_range(start, end),
            (Some(start), None) => filters = filters.with_year_range(start, i32::MAX),
            (None, Some(end)) => filters = filters.with_year_range(i32::MIN, end),
            (None, None) => {}
        }
        PageRequest {
            text: self.text,
            options: QueryOptions {
                mode: if self.boolean {
                    QueryMode::Boolean
                } else {
                    QueryMode::Simple
                },
                fields: self.fields,
            },
            kinds: (!self.kinds.is_empty()).then_some(self.kinds),
            filters,
            sort: self.sort.into(),
            direction: if self.asc {
                SortDirection::Asc
            } else {
                SortDirection::Desc
            },
            page: self.page,
            page_size: self.page_size,
        }
    }
}

fn status_code(report: &DbHealthReport) -> i32 {
    match report.status {
        DbHealthStatus::Ok => 0,
        DbHealthStatus::Error => 1,
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_search_filters() {
        let cli = Cli::parse_from([
            "kiosk",
            "search",
            "smith",
            "--kind",
            "people",
            "--year-start",
            "1990",
            "--year-end",
            "1999",
            "--tag",
            "Band",
            "--any-tag",
        ]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search command");
        };
        let request = args.into_request();
        assert_eq!(request.kinds, Some(vec![EntityKind::Alumni]));
        assert_eq!(request.filters.year_range.map(|r| (r.start, r.end)), Some((1990, 1999)));
        assert_eq!(request.filters.tag_match, TagMatch::Any);
        assert_eq!(request.page_size, 20);
        assert_eq!(request.options, QueryOptions::default());
    }

    #[test]
    fn parses_query_shape() {
        let cli = Cli::parse_from([
            "kiosk",
            "search",
            "band and choir",
            "--boolean",
            "--field",
            "title",
            "--field",
            "caption=4",
        ]);
        let Commands::Search(args) = cli.command else {
            panic!("expected search command");
        };
        let request = args.into_request();
        assert_eq!(request.options.mode, QueryMode::Boolean);
        assert_eq!(
            request.options.fields,
            vec![FieldWeight::new("title"), FieldWeight::boosted("caption", 4.0)]
        );
        assert!(Cli::try_parse_from(["kiosk", "search", "x", "--field", "caption=-1"]).is_err());
    }

    #[test]
    fn parses_import_mode() {
        let cli = Cli::parse_from([
            "kiosk", "--db", "x.sqlite3", "import", "staff", "f.csv", "--mode", "merge",
        ]);
        match cli.command {
            Commands::Import { kind, mode, .. } => {
                assert_eq!(kind, EntityKind::Faculty);
                assert_eq!(mode, ImportMode::Merge);
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.db, Some(PathBuf::from("x.sqlite3")));
    }
}
