use clap::{ArgAction, Args, Parser, Subcommand};
use screenshot_compare::{
    compare, compare_targets_with_progress, BrowserOptions, CaptureOptions, Capturer, CompareOptions,
    ConsoleReporter, Error, JsonReporter, Reporter, Result, TargetOptions, Targets, Viewport,
    DEFAULT_TIMEOUT_MS, DEFAULT_WAIT_AFTER_LOAD_MS,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Visual regression comparison for web pages and screenshots
#[derive(Parser)]
#[command(name = "screenshot-compare")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare screenshots of two web pages
    Compare(CompareArgs),
    /// Capture a screenshot of a web page
    Capture(CaptureArgs),
    /// Compare two existing image files
    Diff(DiffArgs),
}

#[derive(Args)]
struct CompareArgs {
    /// First website URL
    url1: Option<String>,
    /// Second website URL
    url2: Option<String>,
    /// Output filename prefix (defaults to a timestamp)
    #[arg(short = 'o', long)]
    output_prefix: Option<String>,
    /// Directory for screenshots and the diff image
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,
    #[command(flatten)]
    capture: CaptureFlags,
    #[command(flatten)]
    compare: CompareFlags,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CaptureArgs {
    /// Website URL
    url: String,
    /// Output file path
    output: PathBuf,
    #[command(flatten)]
    capture: CaptureFlags,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct DiffArgs {
    /// Baseline image
    image1: PathBuf,
    /// Current image
    image2: PathBuf,
    /// Where to write the diff image
    #[arg(long)]
    output: Option<PathBuf>,
    #[command(flatten)]
    compare: CompareFlags,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CaptureFlags {
    /// Viewport width
    #[arg(long, default_value_t = 1280)]
    viewport_width: u32,
    /// Viewport height
    #[arg(long, default_value_t = 800)]
    viewport_height: u32,
    /// Whether to capture the full page
    #[arg(short = 'f', long, action = ArgAction::Set, default_value = "true", value_parser = parse_bool)]
    full_page: bool,
    /// Additional wait time after page load (ms)
    #[arg(short = 'w', long, default_value_t = DEFAULT_WAIT_AFTER_LOAD_MS)]
    wait: u64,
    /// Page load timeout (ms), 0 for none
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout: u64,
    /// Cookie string to inject (format: name=value;name2=value2)
    #[arg(long)]
    cookie: Option<String>,
    /// Browser executable to use instead of the detected one
    #[arg(long)]
    chrome_path: Option<PathBuf>,
    /// Launch the browser without its sandbox (containers running as root)
    #[arg(long)]
    no_sandbox: bool,
}

impl CaptureFlags {
    fn options(&self) -> CaptureOptions {
        CaptureOptions {
            viewport: Viewport {
                width: self.viewport_width,
                height: self.viewport_height,
            },
            full_page: self.full_page,
            timeout_ms: self.timeout,
            wait_after_load_ms: self.wait,
            cookies: self.cookie.clone(),
            browser: BrowserOptions {
                executable: self.chrome_path.clone(),
                sandbox: !self.no_sandbox,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Args)]
struct CompareFlags {
    /// Difference threshold (decimal between 0-1)
    #[arg(short = 't', long, default_value_t = screenshot_compare::DEFAULT_THRESHOLD)]
    threshold: f64,
    /// Whether to count anti-aliased pixels as different
    #[arg(long, action = ArgAction::Set, default_value = "false", value_parser = parse_bool)]
    include_aa: bool,
}

impl CompareFlags {
    fn options(&self) -> CompareOptions {
        CompareOptions {
            threshold: self.threshold,
            include_aa: self.include_aa,
            ..Default::default()
        }
    }
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    Ok(value.eq_ignore_ascii_case("true"))
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Commands::Compare(args) => args.json,
            Commands::Capture(args) => args.json,
            Commands::Diff(args) => args.json,
        }
    }
}

fn reported(res: io::Result<()>) -> Result<()> {
    res.map_err(|e| Error::Other(format!("Failed to write report: {}", e)))
}

/// Run one command; `Ok(false)` means the comparison failed its threshold.
fn run(command: Commands, reporter: &mut dyn Reporter) -> Result<bool> {
    match command {
        Commands::Compare(args) => {
            let targets = Targets::from_parts(args.url1, args.url2, None, None)?;
            let options = TargetOptions {
                output_dir: Some(args.output_dir),
                output_prefix: args.output_prefix,
                diff_output: None,
                capture: args.capture.options(),
                compare: args.compare.options(),
            };
            let capturer = Capturer::cdp();

            let mut report_err = None;
            let result = compare_targets_with_progress(&capturer, &targets, &options, |step| {
                if let Err(e) = reporter.progress(&step) {
                    report_err.get_or_insert(e);
                }
            })?;
            if let Some(e) = report_err {
                reported(Err(e))?;
            }
            reported(reporter.comparison(&result, options.compare.threshold))?;
            Ok(result.passed)
        }
        Commands::Capture(args) => {
            let path = Capturer::cdp().capture(&args.url, &args.output, &args.capture.options())?;
            reported(reporter.saved(&path))?;
            Ok(true)
        }
        Commands::Diff(args) => {
            let options = args.compare.options();
            let result = compare(&args.image1, &args.image2, args.output.as_deref(), &options)?;
            reported(reporter.comparison(&result, options.threshold))?;
            Ok(result.passed)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let mut reporter: Box<dyn Reporter> = if cli.command.json() {
        Box::new(JsonReporter::stdout())
    } else {
        Box::new(ConsoleReporter::stdout())
    };

    match run(cli.command, reporter.as_mut()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            let _ = reporter.failure(&e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn compare_defaults_match_library_defaults() {
        let cli = Cli::try_parse_from(["screenshot-compare", "compare", "https://a.test", "https://b.test"]).unwrap();
        let Commands::Compare(args) = cli.command else {
            panic!("expected compare");
        };
        assert_eq!(args.url1.as_deref(), Some("https://a.test"));
        assert_eq!(args.output_dir, PathBuf::from("output"));
        assert_eq!(args.capture.options(), CaptureOptions::default());
        assert_eq!(args.compare.options(), CompareOptions::default());
    }

    #[test]
    fn boolean_flags_take_values() {
        let cli = Cli::try_parse_from([
            "screenshot-compare",
            "diff",
            "a.png",
            "b.png",
            "--include-aa",
            "TRUE",
            "-t",
            "0.25",
            "--json",
        ])
        .unwrap();
        let Commands::Diff(args) = cli.command else {
            panic!("expected diff");
        };
        assert!(args.compare.include_aa);
        assert_eq!(args.compare.threshold, 0.25);
        assert!(args.json);

        let cli = Cli::try_parse_from(["screenshot-compare", "capture", "https://a.test", "a.png", "-f", "no"]).unwrap();
        let Commands::Capture(args) = cli.command else {
            panic!("expected capture");
        };
        assert!(!args.capture.options().full_page);
    }

    #[test]
    fn compare_without_urls_is_invalid_input() {
        let cli = Cli::try_parse_from(["screenshot-compare", "compare", "https://a.test"]).unwrap();
        let mut reporter = ConsoleReporter::new(Vec::new(), Vec::new());
        let err = run(cli.command, &mut reporter).unwrap_err();
        assert!(matches!(err, Error::InvalidInputError(_)));
    }
}
