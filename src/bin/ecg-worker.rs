//! One-shot ECG worker: runs a single pipeline operation on a record pair and
//! prints the JSON result to stdout.
//!
//! ```text
//! ecg-worker inference --header A0001.hea --signal A0001.mat [--cached prev.json]
//! ecg-worker plot      --header A0001.hea --signal A0001.mat [--leads I,II] [--max-points 2000]
//! ecg-worker inspect   --header A0001.hea
//! ```
//!
//! `--signal` defaults to the file named in the header. Failures print
//! `{"error": "..."}` and exit with status 1.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use clinic_ecg_lib::config::{self, AppConfig};
use clinic_ecg_lib::ecg::record::declared_signal_path;
use clinic_ecg_lib::ecg::waveform::WaveformSelection;
use clinic_ecg_lib::ecg::{EcgAnalysisPipeline, InferenceAdapter, StoredPrediction};

#[derive(Parser)]
#[command(name = "ecg-worker", version, about = "Run one ECG pipeline operation")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify a record (or reuse a stored prediction).
    Inference {
        #[command(flatten)]
        record: RecordArgs,
        /// JSON file with a previously stored probability map.
        #[arg(long)]
        cached: Option<PathBuf>,
    },
    /// Per-lead display traces in millivolts.
    Plot {
        #[command(flatten)]
        record: RecordArgs,
        /// Comma-separated lead names, e.g. `I,II,V1`.
        #[arg(long)]
        leads: Option<String>,
        #[arg(long)]
        max_points: Option<usize>,
    },
    /// Lead names, sampling rate and sample count.
    Inspect {
        #[command(flatten)]
        record: RecordArgs,
    },
}

#[derive(Args)]
struct RecordArgs {
    #[arg(long)]
    header: PathBuf,
    /// Defaults to the signal file named in the header.
    #[arg(long)]
    signal: Option<PathBuf>,
}

impl RecordArgs {
    fn paths(&self) -> Result<(PathBuf, PathBuf), String> {
        let signal = match &self.signal {
            Some(path) => path.clone(),
            None => declared_signal_path(&self.header).map_err(|e| e.to_string())?,
        };
        Ok((self.header.clone(), signal))
    }
}

fn main() -> ExitCode {
    // stdout carries the JSON result; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (output, code) = report(run(cli.command, pipeline_from_env));
    println!("{output}");
    ExitCode::from(code)
}

/// Output document and process exit status for a finished command.
fn report(result: Result<Value, String>) -> (Value, u8) {
    match result {
        Ok(value) => (value, 0),
        Err(message) => (json!({ "error": message }), 1),
    }
}

/// Run one command. `load_pipeline` is only called when inference may be needed.
fn run(
    command: Command,
    load_pipeline: impl FnOnce() -> Result<EcgAnalysisPipeline, String>,
) -> Result<Value, String> {
    match command {
        Command::Inference { record, cached } => {
            let stored = match cached {
                Some(path) => read_cached(&path),
                None => None,
            };
            let (header, signal) = record.paths()?;
            let pipeline = load_pipeline()?;
            let outcome = pipeline
                .analyze_cached(stored.as_ref(), &header, &signal)
                .map_err(|e| e.to_string())?;
            Ok(json!({
                "source": outcome.source,
                "display_summary": outcome.display_summary(),
                "probabilities": outcome.result.probabilities,
                "primary_diagnosis": outcome.result.primary_diagnosis,
                "summary": outcome.result.summary,
            }))
        }
        Command::Plot {
            record,
            leads,
            max_points,
        } => {
            // Waveform previews never need the model
            let pipeline = EcgAnalysisPipeline::new(Arc::new(InferenceAdapter::unavailable(
                "not loaded for plotting",
            )));
            let (header, signal) = record.paths()?;
            let selection = WaveformSelection::from_query(leads.as_deref(), max_points);
            let preview = pipeline
                .waveform(&header, &signal, &selection)
                .map_err(|e| e.to_string())?;
            serde_json::to_value(preview).map_err(|e| e.to_string())
        }
        Command::Inspect { record } => {
            let (header, signal) = record.paths()?;
            let pipeline = EcgAnalysisPipeline::new(Arc::new(InferenceAdapter::unavailable(
                "not loaded for inspection",
            )));
            let record = pipeline
                .read(&header, &signal)
                .map_err(|e| e.to_string())?;
            Ok(json!({
                "record_name": record.record_name,
                "lead_names": record.channel_names,
                "units": record.units,
                "sampling_rate": record.sampling_rate,
                "num_samples": record.num_samples(),
                "duration_secs": record.duration_secs(),
            }))
        }
    }
}

fn pipeline_from_env() -> Result<EcgAnalysisPipeline, String> {
    let config = AppConfig::from_env().map_err(|e| e.to_string())?;
    let adapter = InferenceAdapter::load(&config.model);
    Ok(EcgAnalysisPipeline::new(Arc::new(adapter)))
}

/// A stored prediction file. Unreadable or malformed files fall through to live analysis.
fn read_cached(path: &Path) -> Option<StoredPrediction> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Cannot read cached prediction: {e}");
            return None;
        }
    };
    match serde_json::from_str::<StoredPrediction>(&text) {
        Ok(stored) => Some(stored),
        Err(e) => {
            tracing::warn!(path = %path.display(), "Ignoring malformed cached prediction: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_ecg_lib::ecg::MockClassifier;

    const LEADS: [&str; 12] = [
        "I", "II", "III", "aVR", "aVL", "aVF", "V1", "V2", "V3", "V4", "V5", "V6",
    ];

    /// Write a 12-lead format-16 record named `name` and return its header path.
    fn write_record(dir: &Path, name: &str, samples: usize) -> PathBuf {
        let mut hea = format!("{name} 12 500 {samples}\n");
        for lead in LEADS {
            hea.push_str(&format!("{name}.dat 16 1000/mV 16 0 0 0 0 {lead}\n"));
        }
        let header = dir.join(format!("{name}.hea"));
        std::fs::write(&header, hea).unwrap();

        let data: Vec<u8> = (0..samples * LEADS.len())
            .flat_map(|i| ((i % 100) as i16).to_le_bytes())
            .collect();
        std::fs::write(dir.join(format!("{name}.dat")), data).unwrap();
        header
    }

    fn record_args(header: &Path) -> RecordArgs {
        RecordArgs {
            header: header.to_path_buf(),
            signal: None,
        }
    }

    fn mock_loader(
        mock: &Arc<MockClassifier>,
    ) -> impl FnOnce() -> Result<EcgAnalysisPipeline, String> {
        let mock = mock.clone();
        move || Ok(EcgAnalysisPipeline::new(Arc::new(InferenceAdapter::new(mock))))
    }

    fn af_mock() -> Arc<MockClassifier> {
        Arc::new(MockClassifier::from_probabilities(&[
            0.1, 0.9, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1,
        ]))
    }

    #[test]
    fn signal_defaults_to_declared_file() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W1", 10);
        let (_, signal) = record_args(&header).paths().unwrap();
        assert_eq!(signal, dir.path().join("W1.dat"));
    }

    #[test]
    fn explicit_signal_wins() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W2", 10);
        let args = RecordArgs {
            header: header.clone(),
            signal: Some(dir.path().join("elsewhere.dat")),
        };
        assert_eq!(args.paths().unwrap().1, dir.path().join("elsewhere.dat"));
    }

    #[test]
    fn complete_cached_map_skips_inference() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W3", 50);
        let cached = dir.path().join("prev.json");
        std::fs::write(
            &cached,
            r#"{"SNR":0.2,"AF":0.1,"IAVB":0.8,"LBBB":0.1,"RBBB":0.1,"PAC":0.1,"PVC":0.1,"STD":0.1,"STE":0.1}"#,
        )
        .unwrap();
        let mock = af_mock();

        let command = Command::Inference {
            record: record_args(&header),
            cached: Some(cached),
        };
        let value = run(command, mock_loader(&mock)).unwrap();
        assert_eq!(value["source"], "cached");
        assert_eq!(value["primary_diagnosis"]["abbreviation"], "IAVB");
        assert!(value["display_summary"].as_str().unwrap().ends_with("(cached)"));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn malformed_cached_file_falls_through_to_live() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W4", 50);
        let cached = dir.path().join("prev.json");
        std::fs::write(&cached, "{not json").unwrap();
        let mock = af_mock();

        let command = Command::Inference {
            record: record_args(&header),
            cached: Some(cached),
        };
        let value = run(command, mock_loader(&mock)).unwrap();
        assert_eq!(value["source"], "live");
        assert_eq!(value["primary_diagnosis"]["abbreviation"], "AF");
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn unreadable_cached_file_falls_through_to_live() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W5", 50);
        let mock = af_mock();

        let command = Command::Inference {
            record: record_args(&header),
            cached: Some(dir.path().join("missing.json")),
        };
        let value = run(command, mock_loader(&mock)).unwrap();
        assert_eq!(value["source"], "live");
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn incomplete_cached_map_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cached = dir.path().join("prev.json");
        std::fs::write(&cached, r#"{"AF":0.9}"#).unwrap();
        // Parses as a map; completeness is checked by the pipeline
        assert!(read_cached(&cached).is_some());

        let header = write_record(dir.path(), "W6", 50);
        let mock = af_mock();
        let command = Command::Inference {
            record: record_args(&header),
            cached: Some(cached),
        };
        let value = run(command, mock_loader(&mock)).unwrap();
        assert_eq!(value["source"], "live");
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn missing_header_reports_error_with_status_1() {
        let dir = tempfile::tempdir().unwrap();
        let mock = af_mock();
        let command = Command::Inference {
            record: record_args(&dir.path().join("absent.hea")),
            cached: None,
        };
        let (output, code) = report(run(command, mock_loader(&mock)));
        assert_eq!(code, 1);
        assert!(output["error"].as_str().unwrap().contains("absent.hea"));
        assert_eq!(mock.call_count(), 0);
    }

    #[test]
    fn inspect_never_loads_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W7", 20);
        let command = Command::Inspect {
            record: record_args(&header),
        };
        let (output, code) = report(run(command, || Err("model must not load".into())));
        assert_eq!(code, 0);
        assert_eq!(output["num_samples"], 20);
        assert_eq!(output["lead_names"][11], "V6");
        assert_eq!(output["sampling_rate"], 500.0);
    }

    #[test]
    fn plot_selects_leads() {
        let dir = tempfile::tempdir().unwrap();
        let header = write_record(dir.path(), "W8", 40);
        let command = Command::Plot {
            record: record_args(&header),
            leads: Some("II,V1".into()),
            max_points: Some(10),
        };
        let value = run(command, || Err("model must not load".into())).unwrap();
        assert_eq!(value["traces"].as_array().unwrap().len(), 2);
        assert_eq!(value["time"].as_array().unwrap().len(), 10);
    }

    #[test]
    fn cli_parses_inference_arguments() {
        let cli = Cli::try_parse_from([
            "ecg-worker",
            "inference",
            "--header",
            "A0001.hea",
            "--cached",
            "prev.json",
        ])
        .unwrap();
        match cli.command {
            Command::Inference { record, cached } => {
                assert_eq!(record.header, PathBuf::from("A0001.hea"));
                assert!(record.signal.is_none());
                assert_eq!(cached, Some(PathBuf::from("prev.json")));
            }
            _ => panic!("expected inference"),
        }
    }
}
