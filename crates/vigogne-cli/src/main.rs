//! Vigogne CLI - LoRA instruction fine-tuning driver.

mod config;

use std::path::{Component, Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use config::FullTrainingConfig;
use serde::Serialize;
use vigogne_core::{ProcessContext, TemplateConfig, IGNORE_INDEX};
use vigogne_data::{
    load_raw_examples, preprocess, DataCollator, DataLoader, DataLoaderConfig, DataPipeline,
    LengthReport, PreprocessStats, PromptTemplate, TextTokenizer, Tokenizer, TokenizerSetup,
};

#[derive(Parser)]
#[command(name = "vigogne")]
#[command(author, version, about = "LoRA instruction fine-tuning of causal language models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize, mask and cache the train/eval datasets
    Prepare {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Show the token length distribution of the training set
    Stats {
        #[command(flatten)]
        run: RunArgs,

        /// Percentiles to report
        #[arg(long, value_delimiter = ',', default_value = "50,90,95,99")]
        percentiles: Vec<f64>,
    },

    /// Show one formatted and masked training example
    Preview {
        #[command(flatten)]
        run: RunArgs,

        /// Index of the example in the training file
        #[arg(short, long, default_value = "0")]
        index: usize,
    },

    /// Write a sample configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "vigogne.yaml")]
        output: String,
    },
}

/// Options shared by every command that reads data. Flags override the YAML file.
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Base model (Hub id or local directory)
    #[arg(short, long)]
    model: Option<String>,

    /// Model revision on the Hub
    #[arg(long)]
    revision: Option<String>,

    /// Training dataset (.json, .jsonl, .csv or .parquet)
    #[arg(long)]
    train_file: Option<String>,

    /// Evaluation dataset
    #[arg(long)]
    eval_file: Option<String>,

    /// Output directory
    #[arg(short, long)]
    output_dir: Option<String>,

    /// Fixed maximum sequence length
    #[arg(long)]
    model_max_length: Option<usize>,

    /// Percentile of example lengths used as maximum length
    #[arg(long)]
    model_max_length_percentile: Option<f64>,

    /// Preprocessing worker threads
    #[arg(long)]
    preprocessing_num_workers: Option<usize>,

    /// Use the English prompt template
    #[arg(long)]
    english: bool,

    /// Disable fp16 (and the padding alignment it implies)
    #[arg(long)]
    no_fp16: bool,

    /// Ignore and do not write the preprocessing cache
    #[arg(long)]
    no_cache: bool,
}

impl RunArgs {
    /// Load the YAML configuration, if any, and apply the flags on top.
    fn resolve(&self) -> anyhow::Result<FullTrainingConfig> {
        let mut config = match &self.config {
            Some(path) => FullTrainingConfig::load(path)?,
            None => FullTrainingConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model.model_name_or_path = model.clone();
        }
        if let Some(revision) = &self.revision {
            config.model.revision = Some(revision.clone());
        }
        if let Some(file) = &self.train_file {
            config.data.train_file = Some(file.clone());
        }
        if let Some(file) = &self.eval_file {
            config.data.eval_file = Some(file.clone());
        }
        if let Some(dir) = &self.output_dir {
            config.training.output_dir = validate_output_path(dir)?.display().to_string();
        }
        if let Some(max) = self.model_max_length {
            config.data.model_max_length = Some(max);
        }
        if let Some(p) = self.model_max_length_percentile {
            config.data.model_max_length_percentile = p;
        }
        if let Some(workers) = self.preprocessing_num_workers {
            config.data.preprocessing_num_workers = Some(workers);
        }
        if self.english {
            config.data.template = TemplateConfig::English;
        }
        if self.no_fp16 {
            config.training.fp16 = false;
        }
        if self.no_cache {
            config.data.use_cache = false;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ctx = ProcessContext::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(ctx.log_level().into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare { run } => {
            let config = run.resolve()?;
            run_prepare(&config, ctx).await?;
        }
        Commands::Stats { run, percentiles } => {
            let config = run.resolve()?;
            run_stats(&config, &percentiles).await?;
        }
        Commands::Preview { run, index } => {
            let config = run.resolve()?;
            run_preview(&config, index).await?;
        }
        Commands::Init { output } => {
            let output = validate_output_path(&output)?;
            generate_sample_config(&output)?;
        }
    }

    Ok(())
}

/// Load the base model's tokenizer and give it a pad token.
async fn load_tokenizer(config: &FullTrainingConfig) -> anyhow::Result<Tokenizer> {
    let token = vigogne_hub::token_from_env();
    let files = vigogne_hub::resolve_tokenizer(
        &config.model.model_name_or_path,
        config.model.revision.as_deref(),
        token.as_ref(),
    )
    .await?;

    let setup = TokenizerSetup {
        llama_special_tokens: config.model.is_llama(),
    };
    let tokenizer = Tokenizer::from_file(&files.tokenizer, &setup)?;
    tracing::info!(
        eos = tokenizer.eos_token(),
        pad = tokenizer.pad_token(),
        pad_id = tokenizer.pad_token_id(),
        num_added_tokens = tokenizer.num_added_tokens(),
        "Loaded tokenizer"
    );
    Ok(tokenizer)
}

/// Summary written by `vigogne prepare`.
#[derive(Debug, Serialize)]
struct PrepareReport {
    model_max_length: usize,
    pad_to_multiple_of: Option<usize>,
    pad_token_id: u32,
    num_added_tokens: usize,
    vocab_size: usize,
    train: PreprocessStats,
    eval: Option<PreprocessStats>,
    length: Option<LengthSummary>,
    batches_per_epoch: usize,
    optimizer_steps_per_epoch: usize,
}

#[derive(Debug, Serialize)]
struct LengthSummary {
    percentile: f64,
    min: usize,
    max: usize,
    mean: f64,
    num_truncated: usize,
}

impl From<&LengthReport> for LengthSummary {
    fn from(report: &LengthReport) -> Self {
        Self {
            percentile: report.percentile,
            min: report.min(),
            max: report.max(),
            mean: report.mean(),
            num_truncated: report.num_truncated(),
        }
    }
}

const REPORT_FILE: &str = "preprocessing_report.json";

async fn run_prepare(config: &FullTrainingConfig, ctx: ProcessContext) -> anyhow::Result<()> {
    let tokenizer = load_tokenizer(config).await?;
    let output_dir = PathBuf::from(&config.training.output_dir);

    let pipeline = DataPipeline::new(&config.data, &tokenizer, ctx, &output_dir)?;
    let data = pipeline.prepare()?;

    let pad_to_multiple_of = config.training.pad_to_multiple_of();
    let train_batches = DataLoader::new(
        data.train.examples.clone(),
        pipeline.collator(pad_to_multiple_of),
        DataLoaderConfig::for_training(&config.training),
    )?
    .num_batches();

    let report = PrepareReport {
        model_max_length: data.model_max_length(),
        pad_to_multiple_of,
        pad_token_id: tokenizer.pad_token_id(),
        num_added_tokens: tokenizer.num_added_tokens(),
        vocab_size: tokenizer.vocab_size(),
        train: data.train.stats.clone(),
        eval: data.eval.as_ref().map(|eval| eval.stats.clone()),
        length: data.length_report.as_ref().map(LengthSummary::from),
        batches_per_epoch: train_batches,
        optimizer_steps_per_epoch: train_batches
            .div_ceil(config.training.gradient_accumulation_steps),
    };

    if !ctx.is_main_process() {
        return Ok(());
    }

    std::fs::create_dir_all(&output_dir)?;
    let report_path = output_dir.join(REPORT_FILE);
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;

    println!("Prepared {} training examples", report.train.num_examples);
    println!("  model_max_length:   {}", report.model_max_length);
    println!("  truncated:          {}", report.train.num_truncated);
    println!("  fully masked:       {}", report.train.num_fully_masked);
    println!("  label tokens:       {}", report.train.num_label_tokens);
    if let Some(eval) = &report.eval {
        println!("Prepared {} evaluation examples", eval.num_examples);
    }
    println!("  batches per epoch:  {}", report.batches_per_epoch);
    println!("  optimizer steps:    {}", report.optimizer_steps_per_epoch);
    println!("Report written to {}", report_path.display());

    Ok(())
}

fn train_examples(config: &FullTrainingConfig) -> anyhow::Result<Vec<vigogne_data::RawExample>> {
    let Some(train_file) = config.data.train_file.as_deref() else {
        anyhow::bail!("You have not specified any train file");
    };
    Ok(load_raw_examples(Path::new(train_file))?)
}

async fn run_stats(config: &FullTrainingConfig, percentiles: &[f64]) -> anyhow::Result<()> {
    let tokenizer = load_tokenizer(config).await?;
    let template = PromptTemplate::from_config(&config.data.template)?;
    let examples = train_examples(config)?;

    let report = LengthReport::compute(
        &examples,
        &template,
        config.data.model_max_length_percentile,
        &tokenizer,
    )?;

    println!("Examples: {}", report.num_examples());
    println!("  min:  {}", report.min());
    println!("  max:  {}", report.max());
    println!("  mean: {:.1}", report.mean());
    for &q in percentiles {
        println!("  p{q:<4} {:.1}", report.at(q)?);
    }
    println!(
        "model_max_length at p{}: {} ({} examples truncated)",
        report.percentile,
        report.model_max_length,
        report.num_truncated()
    );
    Ok(())
}

async fn run_preview(config: &FullTrainingConfig, index: usize) -> anyhow::Result<()> {
    let tokenizer = load_tokenizer(config).await?;
    let template = PromptTemplate::from_config(&config.data.template)?;
    let examples = train_examples(config)?;
    let Some(example) = examples.get(index) else {
        anyhow::bail!("Index {index} out of range ({} examples)", examples.len());
    };

    let model_max_length = match config.data.model_max_length {
        Some(max) => max,
        None => {
            LengthReport::compute(
                &examples,
                &template,
                config.data.model_max_length_percentile,
                &tokenizer,
            )?
            .model_max_length
        }
    };

    let tokenized = preprocess(example, &template, model_max_length, &tokenizer)?;
    let response_ids: Vec<u32> = tokenized
        .input_ids
        .iter()
        .zip(&tokenized.labels)
        .filter(|(_, &label)| label != IGNORE_INDEX)
        .map(|(&id, _)| id)
        .collect();

    let batch = DataCollator::new(tokenizer.pad_token_id())
        .with_pad_to_multiple_of(config.training.pad_to_multiple_of())
        .collate(std::slice::from_ref(&tokenized))?;

    println!("----- prompt -----");
    println!("{}", template.format(example));
    println!("----- supervised -----");
    println!("{}", tokenizer.decode(&response_ids)?);
    println!("----- tokens -----");
    println!("  length:          {}", tokenized.len());
    println!("  masked (prompt): {}", tokenized.prompt_len());
    println!("  label tokens:    {}", tokenized.num_label_tokens());
    println!("  padded width:    {}", batch.seq_len());
    println!("  model_max_length: {model_max_length}");
    Ok(())
}

/// Generate a sample configuration file.
fn generate_sample_config(output: &Path) -> anyhow::Result<()> {
    let yaml = serde_yaml::to_string(&FullTrainingConfig::sample())?;
    std::fs::write(output, yaml)?;

    println!("Sample configuration written to: {}", output.display());
    println!("\nEdit it, then preprocess the data with:");
    println!("  vigogne prepare --config {}", output.display());
    Ok(())
}

/// Reject output paths with `..` components and resolve them against the
/// working directory, creating missing parents.
fn validate_output_path(path: &str) -> anyhow::Result<PathBuf> {
    let path = PathBuf::from(path);
    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        anyhow::bail!(
            "Path traversal detected: '{}' contains a '..' component",
            path.display()
        );
    }

    let resolved = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()?.join(path)
    };
    if let Some(parent) = resolved.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_prepare() {
        let cli = Cli::try_parse_from([
            "vigogne",
            "prepare",
            "--model",
            "decapoda-research/llama-7b-hf",
            "--train-file",
            "data/train.jsonl",
            "--model-max-length-percentile",
            "90",
            "--no-fp16",
        ])
        .unwrap();
        let Commands::Prepare { run } = cli.command else {
            panic!("expected prepare");
        };
        assert_eq!(run.model_max_length_percentile, Some(90.0));
        assert!(run.no_fp16);
    }

    #[test]
    fn test_flags_override_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vigogne.yaml");
        generate_sample_config(&path).unwrap();

        let run = RunArgs {
            config: Some(path),
            model: Some("bigscience/bloom-7b1".into()),
            train_file: Some("other.jsonl".into()),
            model_max_length: Some(256),
            english: true,
            no_fp16: true,
            no_cache: true,
            ..Default::default()
        };
        let config = run.resolve().unwrap();
        assert_eq!(config.model.model_name_or_path, "bigscience/bloom-7b1");
        assert_eq!(config.data.train_file.as_deref(), Some("other.jsonl"));
        assert_eq!(config.data.model_max_length, Some(256));
        assert!(matches!(config.data.template, TemplateConfig::English));
        assert_eq!(config.training.pad_to_multiple_of(), None);
        assert!(!config.data.use_cache);
        // Untouched values come from the file.
        assert_eq!(config.training.gradient_accumulation_steps, 16);
    }

    #[test]
    fn test_stats_percentile_list() {
        let cli = Cli::try_parse_from(["vigogne", "stats", "--percentiles", "50,99"]).unwrap();
        let Commands::Stats { percentiles, .. } = cli.command else {
            panic!("expected stats");
        };
        assert_eq!(percentiles, vec![50.0, 99.0]);
    }

    #[test]
    fn test_output_path_traversal_rejected() {
        assert!(validate_output_path("../outside").is_err());
    }
}
