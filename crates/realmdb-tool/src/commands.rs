//! Command handlers

use crate::OutputFormat;
use anyhow::{Context, Result, bail};
use realmdb_index::{IndexError, Locator, ReadOnlyIndex};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Problems listed individually before the report only counts them
const MAX_LISTED_PROBLEMS: usize = 20;

fn open(path: &Path, banner: Option<&str>) -> Result<ReadOnlyIndex> {
    let index = match banner {
        Some(banner) => ReadOnlyIndex::open(path, banner),
        None => ReadOnlyIndex::open_detect(path),
    };
    index.with_context(|| format!("Failed to open index {}", path.display()))
}

fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = if format == OutputFormat::JsonPretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct Stats {
    path: PathBuf,
    banner: String,
    records: usize,
    header_bytes: usize,
    trailing_bytes: usize,
    file_bytes: u64,
    min_key: Option<i32>,
    max_key: Option<i32>,
}

impl Stats {
    fn collect(index: &ReadOnlyIndex) -> Result<Self> {
        let file_bytes = std::fs::metadata(index.path())?.len();
        let (min_key, max_key) = if index.is_empty() {
            (None, None)
        } else {
            (
                Some(index.record(0)?.key()),
                Some(index.record(index.len() - 1)?.key()),
            )
        };
        Ok(Self {
            path: index.path().to_path_buf(),
            banner: index.banner().to_string(),
            records: index.len(),
            header_bytes: index.header_len(),
            trailing_bytes: index.trailing_bytes(),
            file_bytes,
            min_key,
            max_key,
        })
    }
}

pub fn stats(path: &Path, banner: Option<&str>, format: OutputFormat) -> Result<()> {
    let index = open(path, banner)?;
    let stats = Stats::collect(&index)?;

    if format != OutputFormat::Text {
        return print_json(&stats, format);
    }

    let key = |k: Option<i32>| k.map_or_else(|| "-".to_string(), |k| k.to_string());
    println!("Path:           {}", stats.path.display());
    println!("Banner:         {}", stats.banner);
    println!("Records:        {}", stats.records);
    println!("Key range:      {} .. {}", key(stats.min_key), key(stats.max_key));
    println!("Header bytes:   {}", stats.header_bytes);
    println!("Trailing bytes: {}", stats.trailing_bytes);
    println!("File size:      {} bytes", stats.file_bytes);
    Ok(())
}

pub fn dump(
    path: &Path,
    banner: Option<&str>,
    limit: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let index = open(path, banner)?;
    let limit = limit.unwrap_or(usize::MAX);
    debug!("Dumping up to {} of {} records", limit.min(index.len()), index.len());

    let records: Vec<Locator> = index
        .iter()
        .take(limit)
        .collect::<std::result::Result<_, IndexError>>()
        .with_context(|| format!("Failed to read records from {}", path.display()))?;

    if format != OutputFormat::Text {
        return print_json(&records, format);
    }

    for locator in &records {
        println!("{locator}");
    }
    if records.len() < index.len() {
        println!("... {} more records", index.len() - records.len());
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct Lookup {
    key: i32,
    found: Option<Locator>,
}

pub fn get(path: &Path, banner: Option<&str>, keys: &[i32], format: OutputFormat) -> Result<()> {
    let index = open(path, banner)?;
    let lookups = keys
        .iter()
        .map(|&key| {
            index
                .get(key)
                .map(|found| Lookup { key, found })
                .with_context(|| format!("Failed to look up key {key}"))
        })
        .collect::<Result<Vec<_>>>()?;

    if format != OutputFormat::Text {
        return print_json(&lookups, format);
    }

    for lookup in &lookups {
        match &lookup.found {
            Some(locator) => println!("{}: {locator}", lookup.key),
            None => println!("{}: absent", lookup.key),
        }
    }
    Ok(())
}

/// Structural findings for one index file.
#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub records: usize,
    pub checked: usize,
    pub trailing_bytes: usize,
    pub out_of_order: usize,
    pub duplicates: usize,
    pub decode_errors: usize,
    pub problems: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.out_of_order == 0 && self.duplicates == 0 && self.decode_errors == 0
    }

    fn note(&mut self, problem: String) {
        if self.problems.len() < MAX_LISTED_PROBLEMS {
            self.problems.push(problem);
        }
    }
}

/// Walk every record and check that keys are strictly ascending.
pub fn check(index: &ReadOnlyIndex) -> VerifyReport {
    let mut report = VerifyReport {
        records: index.len(),
        trailing_bytes: index.trailing_bytes(),
        ..VerifyReport::default()
    };

    let mut previous: Option<i32> = None;
    for (position, record) in index.iter().enumerate() {
        let locator = match record {
            Ok(locator) => locator,
            Err(e) => {
                report.decode_errors += 1;
                report.note(format!("record {position}: {e}"));
                break;
            }
        };
        report.checked += 1;

        if let Some(prev) = previous {
            let key = locator.key();
            if key == prev {
                report.duplicates += 1;
                report.note(format!("record {position}: duplicate key {key}"));
            } else if key < prev {
                report.out_of_order += 1;
                report.note(format!("record {position}: key {key} follows {prev}"));
            }
        }
        previous = Some(locator.key());
    }

    report
}

pub fn verify(path: &Path, banner: Option<&str>, format: OutputFormat) -> Result<()> {
    let index = open(path, banner)?;
    let report = check(&index);
    info!(
        "Verified {} of {} records in {}",
        report.checked,
        report.records,
        path.display()
    );

    if format == OutputFormat::Text {
        println!("Records:        {}", report.records);
        println!("Out of order:   {}", report.out_of_order);
        println!("Duplicates:     {}", report.duplicates);
        println!("Decode errors:  {}", report.decode_errors);
        println!("Trailing bytes: {}", report.trailing_bytes);
        for problem in &report.problems {
            println!("  {problem}");
        }
    } else {
        print_json(&report, format)?;
    }

    if !report.is_clean() {
        bail!("Index {} failed verification", path.display());
    }
    if format == OutputFormat::Text {
        println!("OK");
    }
    Ok(())
}
