//! Comparison orchestration: decode, normalize, diff, score, persist.

use crate::diff::diff_padded;
use crate::normalize::normalize;
use crate::{CaptureOptions, Capturer, CompareOptions, Error, Launcher, RasterImage, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Terminal result of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareResult {
    /// Pixels counted as different
    pub diff_pixels: u64,
    /// `diff_pixels / total_pixels * 100`, two decimals
    pub diff_percentage: String,
    pub total_pixels: u64,
    /// The difference percentage is within `threshold * 100`
    pub passed: bool,
    /// Where the diff image was written, if it was
    pub diff_path: Option<PathBuf>,
}

/// A comparison result together with the rendered diff image
#[derive(Debug, Clone)]
pub struct CompareOutcome {
    pub result: CompareResult,
    pub diff: RasterImage,
}

/// Compare two in-memory images.
///
/// The images are padded to their common bounding size first. When
/// `diff_output` is given the diff image is written there after the
/// comparison completed; otherwise nothing touches the filesystem.
pub fn compare_images(
    a: &RasterImage,
    b: &RasterImage,
    diff_output: Option<&Path>,
    options: &CompareOptions,
) -> Result<CompareOutcome> {
    options.validate()?;

    let (extent_a, extent_b) = (a.dimensions(), b.dimensions());
    let (a, b) = normalize(a, b);
    debug!("Comparing {}x{} canvases", a.width(), a.height());
    let summary = diff_padded(&a, &b, extent_a, extent_b, options)?;

    let total_pixels = a.pixel_count();
    let percentage = if total_pixels == 0 {
        0.0
    } else {
        summary.diff_pixels as f64 / total_pixels as f64 * 100.0
    };

    if let Some(path) = diff_output {
        summary.diff.save_png(path)?;
        debug!("Diff image saved to {}", path.display());
    }

    let result = CompareResult {
        diff_pixels: summary.diff_pixels,
        diff_percentage: format_percentage(percentage),
        total_pixels,
        passed: percentage <= options.threshold * 100.0,
        diff_path: diff_output.map(Path::to_path_buf),
    };
    info!(
        "Compared: {} of {} pixels differ ({}%, {} anti-aliased), passed: {}",
        result.diff_pixels, result.total_pixels, result.diff_percentage, summary.aa_pixels, result.passed
    );

    Ok(CompareOutcome {
        result,
        diff: summary.diff,
    })
}

/// Two decimals, halves rounded away from zero (`0.125` is `"0.13"`)
fn format_percentage(percentage: f64) -> String {
    format!("{:.2}", (percentage * 100.0).round() / 100.0)
}

/// Decode two image files and compare them.
pub fn compare(a_path: &Path, b_path: &Path, diff_output: Option<&Path>, options: &CompareOptions) -> Result<CompareResult> {
    let a = RasterImage::open(a_path)?;
    let b = RasterImage::open(b_path)?;
    compare_images(&a, &b, diff_output, options).map(|outcome| outcome.result)
}

/// What to compare: a pair of pages or a pair of image files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Urls { first: String, second: String },
    Images { first: PathBuf, second: PathBuf },
}

impl Targets {
    /// Build targets from optional inputs; exactly one complete pair is required.
    pub fn from_parts(
        url1: Option<String>,
        url2: Option<String>,
        image1: Option<PathBuf>,
        image2: Option<PathBuf>,
    ) -> Result<Self> {
        let urls = match (url1, url2) {
            (Some(first), Some(second)) => Some(Targets::Urls { first, second }),
            (None, None) => None,
            _ => return Err(Error::InvalidInputError("both URLs are required to compare pages".into())),
        };
        let images = match (image1, image2) {
            (Some(first), Some(second)) => Some(Targets::Images { first, second }),
            (None, None) => None,
            _ => return Err(Error::InvalidInputError("both image paths are required to compare images".into())),
        };
        match (urls, images) {
            (Some(t), None) | (None, Some(t)) => Ok(t),
            (None, None) => Err(Error::InvalidInputError(
                "provide either two URLs or two image paths to compare".into(),
            )),
            (Some(_), Some(_)) => Err(Error::InvalidInputError(
                "provide either two URLs or two image paths, not both".into(),
            )),
        }
    }
}

/// Output locations of one URL comparison run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub first: PathBuf,
    pub second: PathBuf,
    pub diff: PathBuf,
}

impl ArtifactPaths {
    /// `{dir}/{prefix}-site1.png`, `{dir}/{prefix}-site2.png`, `{dir}/{prefix}-diff.png`
    pub fn new(dir: &Path, prefix: &str) -> Self {
        Self {
            first: dir.join(format!("{}-site1.png", prefix)),
            second: dir.join(format!("{}-site2.png", prefix)),
            diff: dir.join(format!("{}-diff.png", prefix)),
        }
    }

    /// UTC timestamp usable in file names, e.g. `2024-05-01T12-30-00-123Z`
    pub fn timestamp_prefix() -> String {
        chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
    }

    /// Timestamp prefix followed by the process id and a per-process counter,
    /// e.g. `2024-05-01T12-30-00-123Z-4242-0`. Distinct across concurrent
    /// runs in one process and across processes.
    pub fn unique_prefix() -> String {
        static RUNS: AtomicU64 = AtomicU64::new(0);
        let run = RUNS.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", Self::timestamp_prefix(), std::process::id(), run)
    }
}

/// Options for [`compare_targets`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetOptions {
    /// Directory for captures and the diff image; `./output` when unset
    pub output_dir: Option<PathBuf>,
    /// File name stem for artifacts; [`ArtifactPaths::unique_prefix`] when unset
    pub output_prefix: Option<String>,
    /// Diff image path; overrides the generated one for URL pairs and is the
    /// only artifact written for image pairs
    pub diff_output: Option<PathBuf>,
    /// Applied identically to both captures
    pub capture: CaptureOptions,
    pub compare: CompareOptions,
}

impl TargetOptions {
    fn artifact_paths(&self) -> Result<ArtifactPaths> {
        let dir = self
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("output"));
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let prefix = match &self.output_prefix {
            Some(prefix) => prefix.clone(),
            None => ArtifactPaths::unique_prefix(),
        };
        let mut paths = ArtifactPaths::new(&dir, &prefix);
        if let Some(diff) = &self.diff_output {
            paths.diff = diff.clone();
        }
        Ok(paths)
    }
}

/// A step of a URL comparison, for progress display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<'a> {
    CapturingFirst(&'a str),
    CapturingSecond(&'a str),
    Comparing,
}

/// Compare either two pages (captured sequentially with identical options)
/// or two existing image files.
pub fn compare_targets<L: Launcher>(capturer: &Capturer<L>, targets: &Targets, options: &TargetOptions) -> Result<CompareResult> {
    compare_targets_with_progress(capturer, targets, options, |_| {})
}

/// [`compare_targets`] reporting each step to `on_progress` before it starts.
pub fn compare_targets_with_progress<L: Launcher>(
    capturer: &Capturer<L>,
    targets: &Targets,
    options: &TargetOptions,
    mut on_progress: impl FnMut(Progress<'_>),
) -> Result<CompareResult> {
    match targets {
        Targets::Images { first, second } => {
            on_progress(Progress::Comparing);
            compare(first, second, options.diff_output.as_deref(), &options.compare)
        }
        Targets::Urls { first, second } => {
            options.capture.validate()?;
            options.compare.validate()?;
            let paths = options.artifact_paths()?;

            info!("Capturing first website: {}", first);
            on_progress(Progress::CapturingFirst(first));
            capturer.capture(first, &paths.first, &options.capture)?;
            info!("Capturing second website: {}", second);
            on_progress(Progress::CapturingSecond(second));
            capturer.capture(second, &paths.second, &options.capture)?;

            info!("Comparing screenshots...");
            on_progress(Progress::Comparing);
            compare(&paths.first, &paths.second, Some(paths.diff.as_path()), &options.compare)
        }
    }
}

/// Like [`compare_targets`], but the two captures of a URL pair run
/// concurrently on the blocking thread pool.
pub async fn compare_targets_async<L>(
    capturer: Arc<Capturer<L>>,
    targets: Targets,
    options: TargetOptions,
) -> Result<CompareResult>
where
    L: Launcher + Send + Sync + 'static,
{
    let (first, second) = match targets {
        Targets::Images { .. } => {
            return tokio::task::spawn_blocking(move || compare_targets(&capturer, &targets, &options))
                .await
                .map_err(|e| Error::Other(format!("Comparison task failed: {}", e)))?;
        }
        Targets::Urls { first, second } => (first, second),
    };

    options.capture.validate()?;
    options.compare.validate()?;
    let paths = options.artifact_paths()?;

    let spawn_capture = |url: String, output: PathBuf| {
        let capturer = Arc::clone(&capturer);
        let capture_options = options.capture.clone();
        tokio::task::spawn_blocking(move || capturer.capture(&url, &output, &capture_options))
    };
    let first_task = spawn_capture(first, paths.first.clone());
    let second_task = spawn_capture(second, paths.second.clone());

    let (first_res, second_res) = futures::future::join(first_task, second_task).await;
    first_res.map_err(|e| Error::Other(format!("Capture task failed: {}", e)))??;
    second_res.map_err(|e| Error::Other(format!("Capture task failed: {}", e)))??;

    let compare_options = options.compare.clone();
    tokio::task::spawn_blocking(move || compare(&paths.first, &paths.second, Some(paths.diff.as_path()), &compare_options))
        .await
        .map_err(|e| Error::Other(format!("Comparison task failed: {}", e)))?
}
