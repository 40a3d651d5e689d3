mod compare;
mod extract;
mod fetcher;
mod normalize;
mod processor;
mod settings;
mod sheet;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use compare::Summary;
use fetcher::FetchOutcome;
use normalize::{AddressOutcome, AddressParser, PhoneMatcher, PhoneOutcome};
use processor::Pipeline;
use settings::Settings;

#[derive(Parser)]
#[command(
    name = "contact_audit",
    about = "Scrape listed web pages for contact details and check them against the sheet"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every row of a sheet export and write the results CSV
    Run {
        /// Sheet export (CSV with a header row)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Results file, or a directory for scraped_results_YYYYMMDD.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rows fetched at once (default: 1, strictly sequential)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,
        /// Seconds allowed for connecting and for each read
        #[arg(long)]
        timeout: Option<u64>,
        /// Only process the first N rows
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch one page and show what location expressions pull out of it
    Probe {
        url: String,
        /// Location expression (repeatable)
        #[arg(short = 'x', long = "xpath", required = true)]
        expressions: Vec<String>,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Normalize free text as an address or a phone number
    Normalize {
        #[arg(value_enum)]
        kind: FieldKind,
        /// Text to normalize; several words are joined with spaces
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FieldKind {
    Address,
    Phone,
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

    let result = match cli.command {
        Commands::Run {
            input,
            output,
            concurrency,
            timeout,
            limit,
        } => {
            let mut settings = Settings::load()?;
            if input.is_some() {
                settings.input = input;
            }
            if output.is_some() {
                settings.output = output;
            }
            if let Some(c) = concurrency {
                settings.concurrency = c;
            }
            if let Some(t) = timeout {
                settings.timeout_secs = t;
            }
            settings.validate()?;
            let input = settings.require_input()?.to_path_buf();

            let mut records = sheet::read_records(&input)?;
            if let Some(n) = limit {
                records.truncate(n);
            }
            if records.is_empty() {
                println!("No rows in {}.", input.display());
            }

            let pipeline = Arc::new(Pipeline::new(&settings.fetch_policy())?);
            println!(
                "Scraping {} rows ({} at a time)...",
                records.len(),
                settings.concurrency
            );
            let results =
                processor::run_batch(Arc::clone(&pipeline), records, settings.concurrency).await;

            let path = sheet::write_results_file(
                &settings.output_target(),
                Local::now().date_naive(),
                &results,
            )?;
            println!("Wrote {}\n", path.display());

            Summary::from_results(&results, pipeline.addresses(), pipeline.phones()).print();
            Ok(())
        }
        Commands::Probe {
            url,
            expressions,
            timeout,
        } => {
            let mut settings = Settings::load()?;
            if let Some(t) = timeout {
                settings.timeout_secs = t;
            }
            settings.validate()?;
            probe(&settings, &url, &expressions).await
        }
        Commands::Normalize { kind, text } => {
            match kind {
                FieldKind::Address => print_address(&AddressParser::new()?.normalize_fragments(&text))?,
                FieldKind::Phone => print_phone(&PhoneMatcher::new()?.normalize(&text.join(" "))),
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

async fn probe(settings: &Settings, url: &str, expressions: &[String]) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(&settings.fetch_policy())?;
    info!("Probing {}", url);

    let document = match pipeline.fetcher().fetch(url).await {
        FetchOutcome::Connected(document) => document,
        FetchOutcome::Failed(reason) => {
            println!("Connection failed ({}): {}", reason.kind(), reason);
            return Ok(());
        }
    };

    for expression in expressions {
        let raw = pipeline.evaluator().evaluate(&document, expression);
        let address = pipeline.addresses().normalize(&raw);
        let phone = pipeline.phones().normalize(&raw);

        println!("{}", expression);
        println!("  raw:     {}", display_or_dash(&truncate(&raw, 200)));
        println!(
            "  address: {} ({})",
            display_or_dash(address.full_address().unwrap_or("")),
            address_label(&address)
        );
        println!(
            "  phone:   {} ({})",
            display_or_dash(phone.formatted()),
            phone_label(&phone)
        );
    }
    Ok(())
}

fn print_address(outcome: &AddressOutcome) -> anyhow::Result<()> {
    println!("{}", address_label(outcome));
    let json = serde_json::to_string_pretty(&outcome.fields())
        .context("Failed to render address fields")?;
    println!("{}", json);
    Ok(())
}

fn print_phone(outcome: &PhoneOutcome) {
    println!("{}: {}", phone_label(outcome), display_or_dash(outcome.formatted()));
}

fn address_label(outcome: &AddressOutcome) -> &'static str {
    match outcome {
        AddressOutcome::Empty => "empty",
        AddressOutcome::Parsed(_) => "parsed",
        AddressOutcome::Unparsed(_) => "unparsed, kept raw text",
    }
}

fn phone_label(outcome: &PhoneOutcome) -> &'static str {
    match outcome {
        PhoneOutcome::Empty => "empty",
        PhoneOutcome::Matched(_) => "matched in text",
        PhoneOutcome::Parsed(_) => "parsed whole text",
        PhoneOutcome::NotFound => "not found",
    }
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
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
