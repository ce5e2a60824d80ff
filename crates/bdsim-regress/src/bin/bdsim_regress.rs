use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use bdsim_regress::config::SuiteConfig;
use bdsim_regress::report::produce_report;
use bdsim_regress::suite::{TestSuite, report_from_saved};
use bdsim_regress::{ComponentKind, RegressError};

#[derive(Debug, Clone, Default)]
struct Config {
    config_path: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    simulator: Option<Vec<String>>,
    comparator: Option<Vec<String>>,
    threads: Option<usize>,
    timeout_secs: Option<u64>,
    seed: Option<u64>,
    components: Vec<ComponentKind>,
    generate_reference: bool,
    reference_dir: Option<PathBuf>,
    keep_passed: bool,
    report_only: Option<PathBuf>,
    dry_run: bool,
}

impl Config {
    fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().skip(1).collect();
        Self::parse_from(&args)
    }

    fn parse_from(args: &[String]) -> Result<Self, String> {
        let mut config = Self::default();
        let mut index = 0_usize;
        while index < args.len() {
            let flag = args[index].as_str();
            match flag {
                "--config" => {
                    config.config_path = Some(PathBuf::from(next_value(args, &mut index, flag)?));
                }
                "--output-dir" => {
                    config.output_dir = Some(PathBuf::from(next_value(args, &mut index, flag)?));
                }
                "--simulator" => {
                    config.simulator = Some(split_command(next_value(args, &mut index, flag)?));
                }
                "--comparator" => {
                    config.comparator = Some(split_command(next_value(args, &mut index, flag)?));
                }
                "--threads" => {
                    let value = next_value(args, &mut index, flag)?;
                    config.threads = Some(
                        value
                            .parse::<usize>()
                            .map_err(|error| format!("invalid --threads value={value}: {error}"))?,
                    );
                }
                "--timeout-secs" => {
                    let value = next_value(args, &mut index, flag)?;
                    config.timeout_secs = Some(value.parse::<u64>().map_err(|error| {
                        format!("invalid --timeout-secs value={value}: {error}")
                    })?);
                }
                "--seed" => {
                    let value = next_value(args, &mut index, flag)?;
                    config.seed = Some(
                        value
                            .parse::<u64>()
                            .map_err(|error| format!("invalid --seed value={value}: {error}"))?,
                    );
                }
                "--component" => {
                    let value = next_value(args, &mut index, flag)?;
                    let kind = value
                        .parse::<ComponentKind>()
                        .map_err(|error| format!("invalid --component value={value}: {error}"))?;
                    config.components.push(kind);
                }
                "--generate-reference" => config.generate_reference = true,
                "--reference-dir" => {
                    config.reference_dir =
                        Some(PathBuf::from(next_value(args, &mut index, flag)?));
                }
                "--keep-passed" => config.keep_passed = true,
                "--report-only" => {
                    config.report_only = Some(PathBuf::from(next_value(args, &mut index, flag)?));
                }
                "--dry-run" => config.dry_run = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                other => return Err(format!("unknown_argument: {other}")),
            }
            index += 1;
        }
        Ok(config)
    }

    /// JSON config (if any) overlaid with the command-line flags.
    fn suite_config(&self) -> Result<SuiteConfig, RegressError> {
        let mut suite = match &self.config_path {
            Some(path) => SuiteConfig::load(path)?,
            None => SuiteConfig::default(),
        };
        if let Some(dir) = &self.output_dir {
            suite.output_dir.clone_from(dir);
        }
        if let Some(simulator) = &self.simulator {
            suite.simulator.clone_from(simulator);
        }
        if let Some(comparator) = &self.comparator {
            suite.comparator.clone_from(comparator);
        }
        if let Some(threads) = self.threads {
            suite.requested_threads = threads;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            suite.timeout_secs = timeout_secs;
        }
        if let Some(seed) = self.seed {
            suite.seed = seed;
        }
        if !self.components.is_empty() {
            suite.components.clone_from(&self.components);
        }
        if self.generate_reference {
            suite.generate_reference = true;
        }
        if let Some(dir) = &self.reference_dir {
            suite.reference_dir = Some(dir.clone());
        }
        if self.keep_passed {
            suite.keep_passed_artifacts = true;
        }
        Ok(suite)
    }
}

fn next_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str, String> {
    *index += 1;
    args.get(*index)
        .map(String::as_str)
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn split_command(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_owned).collect()
}

fn print_help() {
    println!(
        "\
bdsim_regress - component regression suite for BDSIM

USAGE:
    bdsim_regress [OPTIONS]

OPTIONS:
    --config <PATH>            JSON suite configuration
    --output-dir <DIR>         Root for test files, logs and reports
    --simulator <CMD>          Simulator command (split on whitespace)
    --comparator <CMD>         Comparator command (split on whitespace)
    --threads <N>              Worker count (0 = one per CPU)
    --timeout-secs <N>         Per-test simulator timeout
    --seed <N>                 Seed passed to every simulator run
    --component <NAME>         Restrict to a component (repeatable)
    --generate-reference       Produce reference output before comparing
    --reference-dir <DIR>      Directory of reference artifacts
    --keep-passed              Keep artifacts of passing tests
    --report-only <PATH>       Re-render the report from saved results
    --dry-run                  Write test files and print counts only
    -h, --help                 Show help
"
    );
}

fn run() -> Result<bool, RegressError> {
    let cli = Config::parse().map_err(RegressError::config)?;
    let suite_config = cli.suite_config()?;

    if let Some(results_path) = &cli.report_only {
        let collection = report_from_saved(results_path, &suite_config.output_dir)?;
        print!("{}", produce_report(&collection));
        return Ok(collection.all_passed_hard_checks());
    }

    let suite = TestSuite::from_config(suite_config)?;
    if cli.dry_run {
        let planned: u64 = suite.planned_counts()?.iter().map(|(_, count)| count).sum();
        println!("planned: {planned} files");
        let written = suite.prepare()?;
        let mut total = 0_usize;
        for (kind, summary) in &written {
            println!(
                "{kind}: {} files ({} written, {} already present)",
                summary.files.len(),
                summary.written,
                summary.skipped
            );
            total += summary.files.len();
        }
        println!("total: {total} files");
        return Ok(true);
    }

    let outcome = suite.run()?;
    print!("{}", produce_report(&outcome.collection));
    println!("results: {}", outcome.results_path.display());
    println!("report: {}", outcome.report_path.display());
    Ok(outcome.all_passed_hard_checks())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("ERROR bdsim_regress overall_pass=false");
            ExitCode::from(1)
        }
        Err(error) => {
            let stage = if error.is_fatal() { "aborted" } else { "failed" };
            eprintln!("ERROR bdsim_regress {stage}: {error}");
            if let Some(hint) = error.suggestion() {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(error.exit_code())
        }
    }
}
