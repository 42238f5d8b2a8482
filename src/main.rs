mod config;
mod db;
mod error;
mod fields;
mod image;
mod metrics;
mod pipeline;
mod service;
mod validate;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::warn;

use config::Settings;
use fields::FieldSpec;
use image::{HttpImageStore, ImageStore};
use pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "form_extractor", about = "Batch field extraction from scanned form images")]
struct Cli {
    /// Config file (default: ./form_extractor.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Load image references, one per line: `filename[,form type]`
    Import { file: PathBuf },
    /// List the extractable fields
    Fields,
    /// Extract one field for every pending row
    Run {
        /// Field name or target column (see `fields`)
        field: String,
        #[arg(short, long)]
        batch_size: Option<usize>,
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Stop after this many batches
        #[arg(short = 'n', long)]
        max_batches: Option<usize>,
    },
    /// Classify form types, then extract every other field
    RunAll {
        #[arg(short, long)]
        batch_size: Option<usize>,
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
    },
    /// Extract one field from one image without writing anything
    Probe {
        field: String,
        /// Filename or full URL
        image: String,
        /// Form type of the image, checked against the field
        #[arg(short, long)]
        form_type: Option<String>,
    },
    /// Pending and filled counts per field
    Status,
    /// Print table structure
    Schema,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Init => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("Schema ready at {}", settings.db_path.display());
            Ok(())
        }
        Commands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let pages: Vec<_> = text.lines().filter_map(parse_import_line).collect();
            for (reference, form_type) in &pages {
                if let Some(ft) = form_type {
                    if !fields::known_form_types().contains(&ft.as_str()) {
                        warn!(reference = %reference, form_type = %ft, "Unrecognized form type");
                    }
                }
            }
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let inserted = db::insert_pages(&conn, &pages)?;
            println!("Inserted {} new images ({} listed)", inserted, pages.len());
            Ok(())
        }
        Commands::Fields => {
            println!(
                "{:<26} | {:<26} | {:<9} | {:<12} | {}",
                "Field", "Column", "Parser", "Sentinel", "Form types"
            );
            println!("{}", "-".repeat(110));
            for f in fields::catalog() {
                let forms = if f.form_types.is_empty() {
                    "(all)".to_string()
                } else {
                    f.form_types.join(", ")
                };
                let sentinel = if f.persist_sentinel { f.sentinel } else { "-" };
                println!(
                    "{:<26} | {:<26} | {:<9} | {:<12} | {}",
                    f.name,
                    f.column,
                    f.parser.label(),
                    sentinel,
                    forms
                );
            }
            Ok(())
        }
        Commands::Run {
            field,
            batch_size,
            concurrency,
            max_batches,
        } => {
            let field = lookup_field(&field)?;
            apply_overrides(&mut settings, batch_size, concurrency);
            if max_batches.is_some() {
                settings.max_batches = max_batches;
            }
            settings.validate()?;

            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let (images, service) = build_clients(&settings)?;
            println!("Extracting {} with {} (model {})", field.name, service.name(), settings.model);
            let summary = Pipeline::new(field, &settings, images, service)
                .show_progress(true)
                .run(&conn)
                .await?;
            summary.print();
            Ok(())
        }
        Commands::RunAll {
            batch_size,
            concurrency,
        } => {
            apply_overrides(&mut settings, batch_size, concurrency);
            settings.validate()?;

            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            let (images, service) = build_clients(&settings)?;

            // catalog order puts the classifier first
            for field in fields::catalog() {
                let pipeline = Pipeline::new(field, &settings, Arc::clone(&images), Arc::clone(&service))
                    .show_progress(true);
                println!("\n== {} ==", pipeline.field().name);
                let summary = pipeline.run(&conn).await?;
                summary.print();
            }
            Ok(())
        }
        Commands::Probe {
            field,
            image,
            form_type,
        } => {
            let field = lookup_field(&field)?;
            if form_type.is_some() && !field.claims(form_type.as_deref()) {
                warn!(
                    field = field.name,
                    form_type = form_type.as_deref().unwrap_or_default(),
                    "Field is not extracted for this form type"
                );
            }
            settings.validate()?;
            let (images, service) = build_clients(&settings)?;
            let pipeline = Pipeline::new(field, &settings, images, service);
            let r = pipeline.probe(&image).await;
            println!("Status: {}", r.status.as_str());
            println!("Raw:    {}", r.raw_text.trim());
            println!("Value:  {}", r.value.as_deref().unwrap_or("-"));
            if let Some(e) = r.error {
                println!("Error:  {}", e);
            }
            Ok(())
        }
        Commands::Status => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            println!("{:<26} | {:>8} | {:>8} | {}", "Field", "Filled", "Pending", "Pending by form type");
            println!("{}", "-".repeat(90));
            for f in fields::catalog() {
                let filled = db::count_filled(&conn, f)?;
                let pending = db::count_pending(&conn, f)?;
                let breakdown: Vec<String> = db::pending_by_form_type(&conn, f)?
                    .into_iter()
                    .map(|(ft, n)| format!("{}: {}", ft, n))
                    .collect();
                println!(
                    "{:<26} | {:>8} | {:>8} | {}",
                    f.name,
                    filled,
                    pending,
                    breakdown.join(", ")
                );
            }
            Ok(())
        }
        Commands::Schema => {
            let conn = db::connect(&settings.db_path)?;
            db::init_schema(&conn)?;
            for (table, columns) in db::table_structure(&conn)? {
                println!("\n{}", table);
                println!("{}", "-".repeat(table.len()));
                for c in columns {
                    println!(
                        "  {:<28} {:<10} {}",
                        c.name,
                        c.data_type,
                        if c.nullable { "NULL" } else { "NOT NULL" }
                    );
                }
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn lookup_field(name: &str) -> anyhow::Result<&'static FieldSpec> {
    fields::find(name).with_context(|| {
        format!("Unknown field {:?}. Known fields: {}", name, fields::names().join(", "))
    })
}

fn apply_overrides(settings: &mut Settings, batch_size: Option<usize>, concurrency: Option<usize>) {
    if let Some(n) = batch_size {
        settings.batch_size = n;
    }
    if let Some(n) = concurrency {
        settings.concurrency = n;
    }
}

fn build_clients(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn ImageStore>, Arc<dyn service::ExtractionService>)> {
    let images: Arc<dyn ImageStore> = Arc::new(HttpImageStore::new(
        &settings.image_base_url,
        settings.request_timeout(),
    )?);
    let service = service::from_settings(settings)?;
    Ok((images, service))
}

/// `filename` or `filename,form type`. Blank lines and `#` comments are skipped.
fn parse_import_line(line: &str) -> Option<(String, Option<String>)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (reference, form_type) = match line.split_once(',') {
        Some((r, ft)) => (r.trim(), Some(ft.trim()).filter(|ft| !ft.is_empty())),
        None => (line, None),
    };
    if reference.is_empty() {
        return None;
    }
    Some((reference.to_string(), form_type.map(str::to_string)))
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
