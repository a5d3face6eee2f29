use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};

use stockmeta::embed::MediaKind;
use stockmeta::record::{MetadataRecord, split_keywords};
use stockmeta::{config, inspect, pipeline};

#[derive(Parser, Debug)]
#[command(
    name = "stockmeta",
    version,
    about = "Embed stock-marketplace metadata (title, description, keywords) into JPEG, PNG, SVG, EPS and video files"
)]
struct Cli {
    /// Media files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// JSON file with title, description and keywords
    #[arg(short, long, value_name = "FILE")]
    metadata: Option<PathBuf>,

    /// Title to embed (overrides --metadata)
    #[arg(long)]
    title: Option<String>,

    /// Description to embed (overrides --metadata)
    #[arg(long)]
    description: Option<String>,

    /// Comma or semicolon separated keywords (overrides --metadata)
    #[arg(long)]
    keywords: Option<String>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Preview changes without writing to files
    #[arg(long)]
    dry_run: bool,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Display embedded metadata and exit
    #[arg(long)]
    show: bool,

    /// Write analysis payloads (downsampled image or video storyboard) into DIR and exit
    #[arg(long, value_name = "DIR")]
    prepare: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = config::Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => config::Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }

    let files = pipeline::collect_media(&cli.paths);
    if files.is_empty() {
        anyhow::bail!("No supported media files found in the specified paths.");
    }

    // Handle --show
    if cli.show {
        for path in &files {
            print_metadata(path)?;
        }
        return Ok(());
    }

    // Load config
    let mut config = config::Config::load(cli.config.as_deref())?;

    // Override dry_run from CLI flag
    if cli.dry_run {
        config.output.dry_run = true;
    }

    // Handle --prepare
    if let Some(out_dir) = &cli.prepare {
        return prepare_all(&files, out_dir, &config, cli.json).await;
    }

    let record = build_record(&cli)?;
    log::info!("Found {} file(s) to process", files.len());
    if config.output.dry_run {
        log::info!("DRY RUN: no files will be modified");
    }

    let total = files.len();
    let results = pipeline::process_batch(files, &record, &config).await;

    for r in &results {
        if let Some(ref err) = r.error {
            log::error!("{}: {err}", r.path.display());
        }
    }

    // JSON output
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    // Summary
    let embedded = results.iter().filter(|r| r.embedded).count();
    let unchanged = results.iter().filter(|r| r.pass_through.is_some()).count();
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    log::info!("Done: {embedded} embedded, {unchanged} unchanged, {failed} failed out of {total} files");

    Ok(())
}

/// Start from `--metadata` (if any), then apply the individual flags.
fn build_record(cli: &Cli) -> Result<MetadataRecord> {
    let mut record = match &cli.metadata {
        Some(path) => MetadataRecord::load(path)?,
        None => MetadataRecord::default(),
    };
    if let Some(ref title) = cli.title {
        record.title = title.clone();
    }
    if let Some(ref description) = cli.description {
        record.description = description.clone();
    }
    if let Some(ref keywords) = cli.keywords {
        record.keywords = split_keywords(keywords);
    }

    if record.is_empty() {
        anyhow::bail!("No metadata given. Use --metadata FILE or --title/--description/--keywords.");
    }
    Ok(record)
}

/// Write one `<file name>.json` payload per input into `out_dir`.
async fn prepare_all(files: &[PathBuf], out_dir: &Path, config: &config::Config, json: bool) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let mut summary = Vec::new();
    for path in files {
        log::info!("Preparing {}", path.display());
        let payload = match pipeline::prepare_file(path, config).await {
            Ok(p) => p,
            Err(e) => {
                log::error!("  {}: {e:#}", path.display());
                continue;
            }
        };

        let name = path.file_name().unwrap_or_default().to_string_lossy();
        let out_path = out_dir.join(format!("{name}.json"));
        std::fs::write(&out_path, serde_json::to_string(&payload)?)
            .with_context(|| format!("Failed to write {}", out_path.display()))?;
        log::info!("  {} ({}, {} base64 chars)", out_path.display(), payload.mime_type, payload.base64.len());

        summary.push(serde_json::json!({
            "path": path.display().to_string(),
            "payload": out_path.display().to_string(),
            "mime_type": payload.mime_type,
            "base64_len": payload.base64.len(),
        }));
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(())
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Max width for the value column before wrapping.
const VAL_WIDTH: usize = 46;
/// Indent for continuation lines (tag column width + " : " = 25 chars + 2 leading spaces).
const INDENT: &str = "                           ";

/// Print embedded XMP (and EXIF, for JPEG) for a file.
fn print_metadata(path: &Path) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let kind = MediaKind::from_path(path);

    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    let xmp = kind.and_then(|k| inspect::extract_xmp(&bytes, k));
    match xmp {
        Some(xmp) => {
            // EPS comment lines carry a "% " prefix
            let packet = xmp.replace("\n% ", "\n");
            let record = inspect::parse_packet(&packet);
            println!("  {BOLD}XMP{RESET}");
            println!("  {DIM}{}{RESET}", "─".repeat(70));
            print_row("dc:title", &record.title);
            print_row("dc:description", &record.description);
            print_row("dc:subject", &record.keywords_joined());
            println!();
        }
        None => {
            println!("  {DIM}(no XMP packet found){RESET}");
            println!();
        }
    }

    if kind == Some(MediaKind::Jpeg) {
        let exif = inspect::read_exif(path)?;
        let fields = [
            ("ImageDescription", exif.description.as_deref()),
            ("XPTitle", exif.xp_title.as_deref()),
            ("XPComment", exif.xp_comment.as_deref()),
            ("XPKeywords", exif.xp_keywords.as_deref()),
            ("Software", exif.software.as_deref()),
        ];
        if fields.iter().any(|(_, v)| v.is_some()) {
            println!("  {BOLD}EXIF{RESET}");
            println!("  {DIM}{}{RESET}", "─".repeat(70));
            for (tag, val) in &fields {
                if let Some(v) = val {
                    print_row(tag, v);
                }
            }
            println!();
        }
    }

    Ok(())
}

/// Print a single row in the metadata display table.
fn print_row(tag: &str, val: &str) {
    let tag_col = format!("{:<22}", tag);
    let lines = wrap_text(val, VAL_WIDTH);
    for (i, line) in lines.iter().enumerate() {
        if i == 0 {
            println!("  {tag_col} : {line}");
        } else {
            println!("  {INDENT}{line}");
        }
    }
}

/// Wrap text at word boundaries to fit within max_width.
fn wrap_text(s: &str, max_width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current_line = String::new();

    for word in s.split_whitespace() {
        if current_line.is_empty() {
            current_line = word.to_string();
        } else if current_line.len() + 1 + word.len() <= max_width {
            current_line.push(' ');
            current_line.push_str(word);
        } else {
            lines.push(current_line);
            current_line = word.to_string();
        }
    }

    if !current_line.is_empty() {
        lines.push(current_line);
    }

    if lines.is_empty() {
        lines.push(s.to_string());
    }

    lines
}
