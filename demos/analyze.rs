//! Chest Radiograph Analysis Example
//!
//! Scores one or more frontal chest radiographs, prints the findings and ranked
//! predictions, and writes the JSON result plus one PNG per saliency overlay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example analyze -- [OPTIONS] --model-dir <MODEL_DIR> <IMAGES>...
//! ```
//!
//! # Arguments
//!
//! * `-m, --model-dir` - Directory holding `manifest.json`, the backbone, and the head
//! * `-t, --thresholds` - Threshold file (default: `<model-dir>/thresholds.json`)
//! * `-o, --output-dir` - Directory for result JSON and overlay PNGs (optional)
//! * `--explain` - Render an overlay for this class instead of the top findings
//! * `--reference` - Clinician label to compare against the ranking
//! * `--device` - Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
//! * `<IMAGES>...` - Paths to input radiographs
//!
//! # Example
//!
//! ```bash
//! cargo run --example analyze -- \
//!     -m models/densenet121 -o out --reference "pleural effusion" \
//!     scan1.png scan2.jpg
//! ```

use clap::Parser;
use cxr_analysis::core::config::onnx::{OrtExecutionProvider, OrtSessionConfig};
use cxr_analysis::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

/// Command-line arguments for the analysis example
#[derive(Parser)]
#[command(name = "analyze")]
#[command(about = "Chest radiograph analysis with Grad-CAM overlays")]
struct Args {
    /// Directory holding the model manifest and weights
    #[arg(short, long)]
    model_dir: PathBuf,

    /// Paths to input radiographs
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Threshold file (defaults to thresholds.json in the model directory)
    #[arg(short, long)]
    thresholds: Option<PathBuf>,

    /// Directory to write result JSON and overlay PNGs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Render an overlay for this class (e.g. "Cardiomegaly")
    #[arg(long)]
    explain: Option<String>,

    /// Reference diagnosis to compare against the top predictions
    #[arg(long)]
    reference: Option<String>,

    /// Number of top predictions checked against the reference (default: 5)
    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Device to use for inference (e.g., 'cpu', 'cuda', 'cuda:0')
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Session pool size for concurrent inference (default: 1)
    #[arg(long, default_value = "1")]
    session_pool_size: usize,
}

fn parse_device(device: &str) -> Result<Vec<OrtExecutionProvider>, Box<dyn std::error::Error>> {
    let device = device.to_lowercase();
    let device_id = if device == "cpu" {
        return Ok(vec![OrtExecutionProvider::CPU]);
    } else if device == "cuda" {
        0
    } else if let Some(id) = device.strip_prefix("cuda:") {
        id.parse()?
    } else {
        return Err(format!("Unsupported device: {device}. Supported devices: cpu, cuda, cuda:N").into());
    };

    if cfg!(not(feature = "cuda")) {
        warn!("CUDA requested but cuda feature not enabled. Falling back to CPU.");
        return Ok(vec![OrtExecutionProvider::CPU]);
    }
    Ok(vec![
        OrtExecutionProvider::CUDA {
            device_id: Some(device_id),
        },
        OrtExecutionProvider::CPU,
    ])
}

fn write_outputs(
    output_dir: &Path,
    stem: &str,
    result: &AnalysisResult,
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(output_dir)?;
    let json_path = output_dir.join(format!("{stem}.json"));
    std::fs::write(&json_path, serde_json::to_string_pretty(result)?)?;
    info!("Wrote {}", json_path.display());

    for overlay in result.overlays() {
        let png_path = output_dir.join(format!("{stem}_{}.png", overlay.class().name()));
        std::fs::write(&png_path, overlay.encode_png()?)?;
        info!("Wrote {}", png_path.display());
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    cxr_analysis::utils::init_tracing();
    let args = Args::parse();

    let mut ort_session = OrtSessionConfig::new();
    for provider in parse_device(&args.device)? {
        ort_session = ort_session.add_execution_provider(provider);
    }

    let mut builder = ChestXrayAnalyzerBuilder::new(&args.model_dir)
        .session_pool_size(args.session_pool_size)
        .ort_session(ort_session);
    if let Some(thresholds) = &args.thresholds {
        builder = builder.thresholds_path(thresholds);
    }
    let targets = match &args.explain {
        Some(class) => Some(SaliencyTargets::named(&[class.as_str()])?),
        None => None,
    };

    let analyzer = builder.build()?;
    info!("Loaded model {}", analyzer.model_version());

    for path in &args.images {
        let start = Instant::now();
        let image = match load_image(path) {
            Ok(image) => image,
            Err(e) => {
                error!("Failed to load {}: {}", path.display(), e);
                continue;
            }
        };
        let result = match &targets {
            Some(targets) => analyzer.analyze_with_targets(&image, targets),
            None => analyzer.analyze(&image),
        };
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                error!("Analysis of {} failed ({}): {}", path.display(), e.kind(), e);
                continue;
            }
        };

        info!(
            "{}: {} finding(s) in {:.1} ms",
            path.display(),
            result.findings().len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        for finding in result.findings() {
            info!(
                "  {:<20} {:.3} (threshold {:.3})",
                finding.class.to_string(),
                finding.score,
                finding.threshold
            );
        }
        for prediction in result.ranked_predictions() {
            info!(
                "  #{} {:<20} {:.3}{}",
                prediction.rank,
                prediction.class.to_string(),
                prediction.score,
                if prediction.detected { " *" } else { "" }
            );
        }

        if let Some(reference) = &args.reference {
            let agreement = ReferenceAgreement::evaluate(&result, reference, args.top_k);
            info!("  Reference '{}': {:?}", reference, agreement);
        }

        if let Some(output_dir) = &args.output_dir {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            write_outputs(output_dir, &stem, &result)?;
        }
    }

    Ok(())
}
