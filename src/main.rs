//! # fuelwatch
//!
//! Command-line front end: train, score and inspect fuel anomaly models.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use fuelwatch::config::{ConfigLoader, FuelwatchConfig};
use fuelwatch::detector::FuelAnomalyDetector;
use fuelwatch::logging::init_logging;
use fuelwatch::service::AnomalyService;
use fuelwatch::FuelRecord;

#[derive(Parser)]
#[command(name = "fuelwatch", version)]
#[command(about = "Fuel consumption anomaly detection", long_about = None)]
struct Cli {
    /// Configuration file (defaults to fuelwatch.toml / config/fuelwatch.toml)
    #[arg(short, long, global = true, env = "FUELWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Model bundle path (overrides model.path)
    #[arg(short, long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model on a JSON array of fuel records and save it
    Train {
        #[arg(short, long)]
        input: PathBuf,

        /// Expected anomaly share (overrides detector.contamination)
        #[arg(long)]
        contamination: Option<f64>,

        /// Random seed (overrides detector.seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Retrain even if a bundle already exists
        #[arg(long)]
        retrain: bool,
    },

    /// Score records and print every row with its verdict
    Predict {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Print anomalous records, most anomalous first
    Anomalies {
        #[arg(short, long)]
        input: PathBuf,

        /// Select by score below this value instead of the model label
        #[arg(short, long)]
        threshold: Option<f64>,
    },

    /// Print the N lowest-scoring records
    Top {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "10")]
        n: usize,
    },

    /// Per-vehicle anomaly breakdown
    Vehicles {
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compare predictions with a JSON array of ground-truth booleans
    Evaluate {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        labels: PathBuf,
    },

    /// Show model status
    Status,

    /// Print a sample configuration file
    SampleConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&content).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Train options that have no effect when an existing bundle is reused
fn ignored_train_options(contamination: Option<f64>, seed: Option<u64>) -> Vec<&'static str> {
    let mut ignored = vec!["--input"];
    if contamination.is_some() {
        ignored.push("--contamination");
    }
    if seed.is_some() {
        ignored.push("--seed");
    }
    ignored
}

fn load_detector(path: &Path) -> Result<FuelAnomalyDetector> {
    FuelAnomalyDetector::load(path)
        .with_context(|| format!("failed to load model bundle {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig { output } = &cli.command {
        let sample = FuelwatchConfig::sample_toml()?;
        match output {
            Some(path) => {
                fs::write(path, sample)?;
                eprintln!("Sample configuration written to {}", path.display());
            }
            None => print!("{}", sample),
        }
        return Ok(());
    }

    let mut config = ConfigLoader::new()
        .with_file(cli.config.as_deref())
        .with_env()
        .build()
        .context("failed to load configuration")?;
    let _log_guard = init_logging(&config.logging)?;

    let model_path = cli.model.clone().unwrap_or_else(|| config.model.path.clone());

    match cli.command {
        Commands::Train {
            input,
            contamination,
            seed,
            retrain,
        } => {
            if let Some(contamination) = contamination {
                config.detector.contamination = contamination;
            }
            if let Some(seed) = seed {
                config.detector.seed = seed;
            }
            config.detector.validate()?;

            let records: Vec<FuelRecord> = if model_path.exists() && !retrain {
                warn!(
                    "Bundle {} exists and --retrain is not set; ignoring {}",
                    model_path.display(),
                    ignored_train_options(contamination, seed).join(", ")
                );
                Vec::new()
            } else {
                let records: Vec<FuelRecord> = read_json(&input)?;
                info!("Read {} records from {}", records.len(), input.display());
                records
            };
            let service = AnomalyService::new(config.detector, config.preprocessing);
            let source = service.load_or_train(&model_path, records, retrain).await?;
            info!("Model ready at {}: {:?}", model_path.display(), source);
            print_json(&service.status().await)?;
        }
        Commands::Predict { input } => {
            let detector = load_detector(&model_path)?;
            let records: Vec<FuelRecord> = read_json(&input)?;
            print_json(&detector.predict(&records)?)?;
        }
        Commands::Anomalies { input, threshold } => {
            let detector = load_detector(&model_path)?;
            let records: Vec<FuelRecord> = read_json(&input)?;
            print_json(&detector.get_anomalies(&records, threshold)?)?;
        }
        Commands::Top { input, n } => {
            let detector = load_detector(&model_path)?;
            let records: Vec<FuelRecord> = read_json(&input)?;
            print_json(&detector.get_top_anomalies(&records, n)?)?;
        }
        Commands::Vehicles { input } => {
            let detector = load_detector(&model_path)?;
            let records: Vec<FuelRecord> = read_json(&input)?;
            print_json(&detector.analyze_anomalies_by_vehicle(&records)?)?;
        }
        Commands::Evaluate { input, labels } => {
            let detector = load_detector(&model_path)?;
            let records: Vec<FuelRecord> = read_json(&input)?;
            let truth: Vec<bool> = read_json(&labels)?;
            let report = detector.evaluate_with_labels(&records, &truth)?;
            eprintln!("{}", report);
            print_json(&report)?;
        }
        Commands::Status => {
            let service = AnomalyService::new(config.detector, config.preprocessing);
            if model_path.exists() {
                service.load(&model_path).await?;
            }
            print_json(&service.status().await)?;
        }
        Commands::SampleConfig { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ignored_train_options() {
        assert_eq!(ignored_train_options(None, None), vec!["--input"]);
        assert_eq!(
            ignored_train_options(Some(0.1), Some(7)),
            vec!["--input", "--contamination", "--seed"]
        );
        assert_eq!(
            ignored_train_options(None, Some(7)),
            vec!["--input", "--seed"]
        );
    }

    #[test]
    fn test_train_flags_parse() {
        let cli = Cli::try_parse_from([
            "fuelwatch",
            "train",
            "--input",
            "fleet.json",
            "--seed",
            "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Train {
                seed,
                contamination,
                retrain,
                ..
            } => {
                assert_eq!(ignored_train_options(contamination, seed), vec!["--input", "--seed"]);
                assert!(!retrain);
            }
            _ => panic!("expected train command"),
        }
    }
}
