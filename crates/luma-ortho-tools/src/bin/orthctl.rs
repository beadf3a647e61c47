//! `orthctl`: run orthogonal bitmap aggregates over JSON rows and check
//! expressions from the command line.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use luma_ortho::{
    AggregateFunctionFactory, BucketExpr, BucketKey, ColumnData, DataType, FinalizeResult,
    FunctionArgument, OrthConfig, Value,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orthctl")]
#[command(about = "LumaDB orthogonal bitmap aggregation tool", long_about = None)]
struct Cli {
    /// TOML file with aggregation limits
    #[arg(long, global = true, env = "ORTHCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate rows with one function, going through partial states
    Run {
        #[arg(short, long)]
        function: String,
        /// Constant argument after the key column (filter value or expression)
        #[arg(short, long = "arg")]
        args: Vec<String>,
        /// JSON array of {"key": ..., "ids": [...]} rows
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        partitions: usize,
        /// Call the function without a key column
        #[arg(long)]
        no_key: bool,
    },
    /// Parse an expression and list the buckets it references
    Check {
        #[arg(short, long)]
        expr: String,
        /// Parse bucket names as 64-bit integers
        #[arg(long)]
        integer_keys: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum RowKey {
    Int(i64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Row {
    #[serde(default)]
    key: Option<RowKey>,
    #[serde(default)]
    ids: Option<Vec<u32>>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => OrthConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => OrthConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            function,
            args,
            input,
            partitions,
            no_key,
        } => {
            let rows = read_rows(&input)?;
            let result = run(&config, &function, &args, &rows, partitions, no_key)?;
            println!("{}", render(&result)?);
        }
        Commands::Check { expr, integer_keys } => {
            let report = if integer_keys {
                check::<i64>(&expr, &config)?
            } else {
                check::<String>(&expr, &config)?
            };
            println!("{}", report);
        }
    }
    Ok(())
}

fn read_rows(path: &Path) -> anyhow::Result<Vec<Row>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading rows from {}", path.display()))?;
    let rows: Vec<Row> = serde_json::from_str(&contents)
        .with_context(|| format!("parsing rows from {}", path.display()))?;
    info!("Loaded {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

/// Key column type implied by the rows: integer unless any key is a string.
fn key_type(rows: &[Row]) -> DataType {
    let has_text = rows
        .iter()
        .any(|row| matches!(row.key, Some(RowKey::Text(_))));
    if has_text || rows.iter().all(|row| row.key.is_none()) {
        DataType::Utf8
    } else {
        DataType::Int64
    }
}

fn literal(raw: &str, key_type: &DataType, function: &str) -> anyhow::Result<Value> {
    if function.to_ascii_lowercase().contains("expr_calculate") || !key_type.is_integer() {
        return Ok(Value::from(raw));
    }
    let value: i64 = raw
        .parse()
        .with_context(|| format!("argument '{}' is not an integer", raw))?;
    Ok(Value::Int64(value))
}

fn columns(rows: &[&Row], key_type: &DataType) -> anyhow::Result<(ColumnData, ColumnData)> {
    let bitmaps = ColumnData::Bitmap(
        rows.iter()
            .map(|row| row.ids.as_ref().map(|ids| ids.iter().copied().collect()))
            .collect(),
    );
    let keys = if key_type.is_integer() {
        let mut cells = Vec::with_capacity(rows.len());
        for row in rows {
            cells.push(match &row.key {
                Some(RowKey::Int(v)) => Some(*v),
                Some(RowKey::Text(s)) => bail!("string key '{}' in an integer key column", s),
                None => None,
            });
        }
        ColumnData::Int64(cells)
    } else {
        ColumnData::Utf8(
            rows.iter()
                .map(|row| match &row.key {
                    Some(RowKey::Int(v)) => Some(v.to_string()),
                    Some(RowKey::Text(s)) => Some(s.clone()),
                    None => None,
                })
                .collect(),
        )
    };
    Ok((bitmaps, keys))
}

/// Split rows round-robin into `partitions` partial states, ship each through
/// its byte encoding, merge and finalize.
fn run(
    config: &OrthConfig,
    function_name: &str,
    raw_args: &[String],
    rows: &[Row],
    partitions: usize,
    no_key: bool,
) -> anyhow::Result<FinalizeResult> {
    if partitions == 0 {
        bail!("--partitions must be at least 1");
    }
    let key_type = key_type(rows);
    let mut arguments = vec![FunctionArgument::column(DataType::Bitmap)];
    if !no_key {
        arguments.push(FunctionArgument::column(key_type.clone()));
    }
    for raw in raw_args {
        arguments.push(FunctionArgument::literal(literal(
            raw,
            &key_type,
            function_name,
        )?));
    }

    let factory = AggregateFunctionFactory::with_config(config.clone());
    let function = factory.try_get(function_name, &arguments, false)?;

    let mut merged = function.create_state();
    for partition in 0..partitions {
        let chunk: Vec<&Row> = rows.iter().skip(partition).step_by(partitions).collect();
        let (bitmaps, keys) = columns(&chunk, &key_type)?;
        let mut state = function.create_state();
        if no_key {
            function.add_batch(&mut state, &[&bitmaps])?;
        } else {
            function.add_batch(&mut state, &[&bitmaps, &keys])?;
        }

        let mut bytes = Vec::new();
        function.serialize(&state, &mut bytes)?;
        debug!(
            "Partition {} holds {} rows in {} bytes",
            partition,
            chunk.len(),
            bytes.len()
        );
        let shipped = function.deserialize(&bytes)?;
        function.merge_owned(&mut merged, shipped)?;
    }

    Ok(function.finalize(merged)?)
}

fn render(result: &FinalizeResult) -> anyhow::Result<String> {
    Ok(match result {
        FinalizeResult::Count(count) => count.to_string(),
        FinalizeResult::Bitmap(bitmap) => {
            serde_json::to_string(&bitmap.iter().collect::<Vec<u32>>())?
        }
    })
}

fn check<K: BucketKey>(source: &str, config: &OrthConfig) -> anyhow::Result<String> {
    let expr = BucketExpr::<K>::parse(source, config)
        .with_context(|| format!("invalid expression '{}'", source))?;
    let names: Vec<String> = expr.bucket_names().iter().map(K::to_name).collect();
    Ok(format!("{}\nbuckets: {}", expr, names.join(", ")))
}
