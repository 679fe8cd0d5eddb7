/*!
Tabula command line interface

Inspects, summarizes and converts saved column files.
*/

pub mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tabula_core::{Column, ColumnMode, LoadWarning, DEFAULT_DATETIME_FORMAT};
use tabula_history::{HistoryManager, SetDateTimeFormatCommand, SetModeCommand};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "tabula")]
#[command(about = "Inspect and convert Tabula column files")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print load warnings and descriptive statistics as JSON
    Stats {
        /// Column file to read
        file: PathBuf,
    },

    /// Convert a column to another mode and save it
    Convert {
        /// Column file to read
        file: PathBuf,

        /// Target mode: numeric, text, month, day, datetime, integer, or a numeric code
        #[arg(long, value_parser = parse_mode)]
        mode: ColumnMode,

        /// Output file path (defaults to rewriting the input)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Date-time format used for text conversions
        #[arg(long)]
        datetime_format: Option<String>,
    },

    /// Print name, mode, row count, masks, formulas and properties as JSON
    Info {
        /// Column file to read
        file: PathBuf,
    },
}

/// Accept a mode name or its persisted numeric code
pub fn parse_mode(text: &str) -> Result<ColumnMode, String> {
    if let Some(mode) = ColumnMode::from_name(text) {
        return Ok(mode);
    }
    text.trim()
        .parse::<i32>()
        .ok()
        .and_then(ColumnMode::from_code)
        .ok_or_else(|| format!("unknown column mode '{}'", text))
}

/// Run one command, writing its report to `out`
pub fn run(cli: Cli, config: &Config, out: &mut impl Write) -> anyhow::Result<()> {
    match cli.command {
        Commands::Stats { file } => cmd_stats(&file, out),
        Commands::Info { file } => cmd_info(&file, out),
        Commands::Convert {
            file,
            mode,
            output,
            datetime_format,
        } => {
            let output = output.unwrap_or_else(|| file.clone());
            cmd_convert(&file, mode, &output, datetime_format, config, out)
        }
    }
}

fn load(path: &Path) -> anyhow::Result<(Column, Vec<LoadWarning>)> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let loaded =
        Column::load(BufReader::new(file)).with_context(|| format!("reading {}", path.display()))?;
    Ok(loaded)
}

fn write_json(out: &mut impl Write, value: &serde_json::Value) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn cmd_stats(path: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let (column, warnings) = load(path)?;
    let report = json!({
        "name": column.name(),
        "mode": column.column_mode().name(),
        "warnings": warnings,
        "statistics": column.statistics(),
    });
    write_json(out, &report)
}

fn cmd_info(path: &Path, out: &mut impl Write) -> anyhow::Result<()> {
    let (column, warnings) = load(path)?;
    let masks: Vec<[usize; 2]> = column
        .masked_intervals()
        .into_iter()
        .map(|iv| [iv.start, iv.end])
        .collect();
    let formulas: Vec<_> = column
        .formulas()
        .entries()
        .iter()
        .map(|(iv, formula)| json!({ "start": iv.start, "end": iv.end, "formula": formula }))
        .collect();

    let report = json!({
        "name": column.name(),
        "mode": column.column_mode().name(),
        "rows": column.row_count(),
        "plot_designation": column.plot_designation(),
        "datetime_format": column.datetime_format(),
        "masks": masks,
        "formulas": formulas,
        "global_formula": column.global_formula(),
        "properties": column.properties(),
        "warnings": warnings,
    });
    write_json(out, &report)
}

fn cmd_convert(
    path: &Path,
    mode: ColumnMode,
    output: &Path,
    datetime_format: Option<String>,
    config: &Config,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let (mut column, warnings) = load(path)?;
    let from = column.column_mode();

    let format = datetime_format.or_else(|| {
        (column.datetime_format() == DEFAULT_DATETIME_FORMAT
            && config.datetime_format != DEFAULT_DATETIME_FORMAT)
            .then(|| config.datetime_format.clone())
    });

    let mut history = HistoryManager::new(config.history_depth);
    history.start_group(format!("convert to {}", mode));
    if let Some(format) = format {
        history.execute(Box::new(SetDateTimeFormatCommand::new(format)), &mut column)?;
    }
    history.execute(Box::new(SetModeCommand::new(mode)), &mut column)?;
    history.end_group();

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    column.save(&mut writer)?;
    writer.flush()?;
    tracing::info!(
        column = %column.name(),
        %from,
        to = %mode,
        output = %output.display(),
        "converted column"
    );

    let report = json!({
        "name": column.name(),
        "from": from.name(),
        "to": mode.name(),
        "rows": column.row_count(),
        "invalid_rows": (0..column.row_count()).filter(|&r| !column.is_valid(r)).count(),
        "output": output.display().to_string(),
        "warnings": warnings,
    });
    write_json(out, &report)
}
