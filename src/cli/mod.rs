//! Command-line interface.
//!
//! Operates on a local state snapshot (the in-memory store's JSON file);
//! wiring against a remote document store is the orchestrator's job and
//! lives outside this crate.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use console::style;

use crate::config::PipelineConfig;
use crate::persist::load_book;
use crate::state::{BookConfig, BookState, OpKind};
use crate::store::{collections, DocQuery, MemoryStore, StateStore};

#[derive(Parser)]
#[command(name = "bindery", version, about = "Book-scanning pipeline state engine")]
pub struct Cli {
    /// Path to the pipeline config TOML.
    #[arg(long, global = true, env = "BINDERY_CONFIG")]
    config: Option<PathBuf>,

    /// Path to a state snapshot file.
    #[arg(long, global = true, env = "BINDERY_STATE", default_value = "state.json")]
    state: PathBuf,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show a book's processing progress.
    Status {
        /// Book document id.
        book_id: String,
    },
    /// Show per-page completion.
    Pages {
        /// Book document id.
        book_id: String,
    },
    /// Reset an operation and everything downstream of it.
    Reset {
        /// Book document id.
        book_id: String,
        /// Operation to reset from (metadata, toc_finder, toc_extract,
        /// toc_link, toc_finalize, structure).
        op: String,
    },
    /// Write a default config file.
    InitConfig {
        /// Destination path.
        #[arg(default_value = "bindery.toml")]
        path: PathBuf,
    },
}

pub fn is_verbose() -> bool {
    std::env::args().any(|a| a == "-v" || a == "--verbose")
}

async fn open_book(
    config: &PipelineConfig,
    state_path: &PathBuf,
    book_id: &str,
) -> anyhow::Result<(BookState, Arc<MemoryStore>)> {
    let store = Arc::new(
        MemoryStore::load_from_path(state_path)
            .with_context(|| format!("opening state snapshot {}", state_path.display()))?,
    );
    let dyn_store: Arc<dyn StateStore> = store.clone();

    let docs = dyn_store
        .execute(DocQuery::collection(collections::BOOK).filter("_id", book_id))
        .await?;
    if docs.is_empty() {
        bail!("no book {book_id} in {}", state_path.display());
    }
    let total_pages = docs[0].u32_field("total_pages").unwrap_or(0);

    let book_config = BookConfig {
        total_pages,
        ocr_providers: config.ocr_providers.clone(),
        phase_models: config.phase_models.clone(),
        stages: config.stages,
        max_retries: config.max_retries,
        data_dir: config.data_dir.clone(),
        ..Default::default()
    };
    let book = load_book(dyn_store, book_id, book_config).await?;
    Ok((book, store))
}

fn print_status(book: &BookState) {
    let metadata = book.metadata();
    println!(
        "{} {}",
        style("book").dim(),
        metadata.title.as_deref().unwrap_or(book.id())
    );
    println!(
        "  status: {}  pages: {}/{} ocr'd",
        book.status().as_str(),
        book.count_ocr_pages(),
        book.total_pages(),
    );

    println!("  operations:");
    for op in OpKind::ALL {
        let (started, complete, failed, retries) = book.op_flags(op);
        let state = if complete {
            style("complete").green()
        } else if failed {
            style("failed").red()
        } else if started {
            style("in progress").yellow()
        } else {
            style("not started").dim()
        };
        println!("    {:<13} {state}  (retries: {retries})", op.as_str());
    }

    let chapters = book.structure_chapters();
    if !chapters.is_empty() {
        let extracted = chapters.iter().filter(|c| c.extract_done).count();
        let polished = chapters.iter().filter(|c| c.polish_done).count();
        println!(
            "  chapters: {} ({} extracted, {} polished)",
            chapters.len(),
            extracted,
            polished
        );
    }

    let costs = book.costs_by_stage();
    if !costs.is_empty() {
        let mut stages: Vec<_> = costs.iter().collect();
        stages.sort_by(|a, b| a.0.cmp(b.0));
        println!("  costs: ${:.4} total", book.total_cost());
        for (stage, amount) in stages {
            println!("    {stage:<13} ${amount:.4}");
        }
    }
}

fn print_pages(book: &BookState) {
    let providers = book.ocr_providers().to_vec();
    println!("page  extracted  ocr  blended");
    book.for_each_page(|page| {
        println!(
            "{:>4}  {:^9}  {:^3}  {:^7}",
            page.page_num(),
            if page.is_extracted() { "yes" } else { "-" },
            if page.all_ocr_done(&providers) {
                "yes"
            } else {
                "-"
            },
            if page.blend_complete() { "yes" } else { "-" },
        );
    });
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Status { book_id } => {
            let (book, _store) = open_book(&config, &cli.state, &book_id).await?;
            book.ensure_costs_loaded().await?;
            print_status(&book);
        }
        Command::Pages { book_id } => {
            let (book, _store) = open_book(&config, &cli.state, &book_id).await?;
            print_pages(&book);
        }
        Command::Reset { book_id, op } => {
            let Some(op) = OpKind::parse(&op) else {
                bail!("unknown operation {op:?}");
            };
            let (book, store) = open_book(&config, &cli.state, &book_id).await?;
            book.reset_from(op).await?;
            store.save_to_path(&cli.state)?;
            println!(
                "{} reset {} and downstream operations",
                style("✓").green(),
                op
            );
        }
        Command::InitConfig { path } => {
            if path.exists() {
                bail!("{} already exists", path.display());
            }
            PipelineConfig::default().save(&path)?;
            println!("{} wrote {}", style("✓").green(), path.display());
        }
    }
    Ok(())
}
