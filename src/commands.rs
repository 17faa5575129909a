// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subcommand implementations for the jobmatch binary.

use anyhow::{bail, Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

use jobmatch::config::Config;
use jobmatch::embedding::chunk;
use jobmatch::ingest::{upload_csv, ObjectSize, StorageEvent, UploadOutcome};
use jobmatch::model::JobMatch;
use jobmatch::output::{
    colorize_detail, colorize_heading, colorize_id, colorize_ok, colorize_score, to_json,
    use_colors,
};
use jobmatch::pipeline::{embed_text, run_trans, TransRequest};
use jobmatch::server;
use jobmatch::services::Services;
use jobmatch::webhook::{dispatch, WebhookRequest};

use crate::cli::OutputFormat;

/// Settings shared by every subcommand.
pub struct Env {
    pub data_root: PathBuf,
    pub config: Config,
    pub format: OutputFormat,
    pub compact: bool,
}

impl Env {
    fn services(&self) -> Result<Services> {
        Services::from_config(&self.config, &self.data_root)
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        println!("{}", to_json(value, self.compact)?);
        Ok(())
    }
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read stdin")?;
            Ok(buffer)
        }
    }
}

pub fn chunk_text(env: &Env, file: Option<&Path>, max_size: Option<usize>) -> Result<()> {
    let text = read_input(file)?;
    let max_size = max_size.unwrap_or_else(|| env.config.warehouse.chunk_size());
    let chunks = chunk(&text, max_size)?;

    if env.json() {
        return env.print_json(&chunks);
    }
    let use_color = use_colors();
    for (i, c) in chunks.iter().enumerate() {
        let label = format!("[{}] ({} chars)", i + 1, c.size);
        println!("{} {}", colorize_detail(&label, use_color), c.content);
    }
    Ok(())
}

pub fn load_csv(env: &Env, file: &Path, table: Option<&str>) -> Result<()> {
    let mut services = env.services()?;
    let table = table
        .map(str::to_string)
        .unwrap_or_else(|| services.settings.source_table.clone());
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let options = services.settings.csv_options();
    let report = services.warehouse.load_csv(&table, &data, &options)?;
    let total_rows = services.warehouse.row_count(&table)?;

    if env.json() {
        return env.print_json(&serde_json::json!({
            "table": table,
            "rows_loaded": report.rows_loaded,
            "bad_records": report.bad_records,
            "total_rows": total_rows,
        }));
    }
    let use_color = use_colors();
    println!(
        "{} {} rows into {} ({} bad, {} total)",
        colorize_ok("Loaded", use_color),
        report.rows_loaded,
        colorize_id(&table, use_color),
        report.bad_records,
        total_rows
    );
    Ok(())
}

pub fn upload_event(env: &Env, bucket: &str, name: &str, size: Option<&str>) -> Result<()> {
    let mut services = env.services()?;
    let size = match size {
        Some(raw) => ObjectSize::Text(raw.to_string()),
        None => ObjectSize::Bytes(
            services
                .drive
                .read_object(bucket, name)?
                .map(|bytes| bytes.len() as u64)
                .unwrap_or(0),
        ),
    };
    let event = StorageEvent {
        bucket: bucket.to_string(),
        name: name.to_string(),
        size,
    };
    let outcome = upload_csv(&mut services, &event)?;

    if env.json() {
        return env.print_json(&outcome);
    }
    let use_color = use_colors();
    match outcome {
        UploadOutcome::Loaded {
            table,
            rows_loaded,
            bad_records,
            total_rows,
        } => {
            println!(
                "{} {} rows into {} ({} bad)",
                colorize_ok("Loaded", use_color),
                rows_loaded,
                colorize_id(&table, use_color),
                bad_records
            );
            println!("Total {} rows in table", total_rows);
        }
        UploadOutcome::Skipped { reason } => println!("{}", reason),
    }
    Ok(())
}

pub fn trans(env: &Env, mode: &str) -> Result<()> {
    let mut services = env.services()?;
    let request = TransRequest {
        mode: Some(mode.to_string()),
    };
    let report = run_trans(&mut services, &request, !env.json())?;

    if env.json() {
        return env.print_json(&report);
    }
    let use_color = use_colors();
    if let Some(t) = report.transform {
        println!(
            "{} {} postings into {} chunks ({} split)",
            colorize_ok("Chunked", use_color),
            t.postings,
            t.chunks,
            t.split_postings
        );
    }
    if let Some(i) = report.index {
        println!(
            "{} {} jobs ({} skipped)",
            colorize_ok("Indexed", use_color),
            i.jobs_indexed,
            i.jobs_skipped
        );
    }
    println!("OK");
    Ok(())
}

pub fn match_resume(
    env: &Env,
    text: Option<&str>,
    file: Option<&Path>,
    top_k: Option<usize>,
) -> Result<()> {
    let resume = match (text, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => read_input(Some(path))?,
        (None, None) => bail!("Provide resume text or --file"),
    };
    let mut services = env.services()?;
    if services.index.count()? == 0 {
        bail!("No jobs indexed yet; run `jobmatch trans --mode all` first");
    }
    let vector = embed_text(&mut services, &resume)?
        .ok_or_else(|| anyhow::anyhow!("Resume text is empty"))?;
    let top_k = top_k.unwrap_or(services.settings.top_k);

    let matches: Vec<JobMatch> = services
        .index
        .query(&vector, top_k)?
        .into_iter()
        .map(|n| JobMatch {
            title: n.metadata["title"].as_str().map(str::to_string),
            company: n.metadata["company"].as_str().map(str::to_string),
            job_id: n.id,
            score: n.score,
        })
        .collect();

    if env.json() {
        return env.print_json(&matches);
    }
    let use_color = use_colors();
    for (rank, m) in matches.iter().enumerate() {
        println!(
            "{:>2}. {} {} {}",
            rank + 1,
            colorize_score(m.score, use_color),
            colorize_heading(&m.label(), use_color),
            colorize_detail(&format!("[{}]", m.job_id), use_color)
        );
    }
    Ok(())
}

pub fn webhook(env: &Env, file: Option<&Path>) -> Result<()> {
    let raw = read_input(file)?;
    let request: WebhookRequest =
        serde_json::from_str(&raw).context("Invalid webhook request JSON")?;
    let mut services = env.services()?;
    let response = dispatch(&mut services, &request)?;
    env.print_json(&response)
}

pub fn serve(env: &Env, bind: Option<&str>) -> Result<()> {
    let services = env.services()?;
    let bind = bind.unwrap_or_else(|| env.config.server.bind()).to_string();
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    runtime.block_on(server::serve(services, &bind))
}
