// ========================================================================================
//
//                      The command-line entry point of gradeband
//
// ========================================================================================
//
// Parses arguments, resolves the configuration (defaults, then an optional TOML file,
// then command-line overrides), runs the pipeline once and prints the final metrics.
// Any error is reported on stderr and ends the process with status 1.

use clap::Parser;
use gradeband::config::PipelineConfig;
use gradeband::pipeline::{self, PipelineOptions, PipelineReport};
use gradeband::remote::{HttpSource, RemoteSource};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(
    name = "gradeband",
    version,
    about = "Classify student performance from the UCI student cohorts and compare grades by internet access."
)]
struct Args {
    /// Directory holding student-mat.csv and student-por.csv.
    #[clap(long)]
    data_dir: Option<PathBuf>,

    /// Directory the charts and predictions are written to.
    #[clap(long)]
    results_dir: Option<PathBuf>,

    /// TOML file overriding any part of the default configuration.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Add World Bank macro indicators as constant feature columns.
    #[clap(long)]
    macro_features: bool,

    /// Choose forest parameters by cross-validated grid search.
    #[clap(long)]
    grid_search: bool,

    /// Never touch the network: no downloads, no World Bank queries.
    #[clap(long)]
    offline: bool,

    /// Save the fitted forest to this TOML file.
    #[clap(long)]
    save_model: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let start_time = Instant::now();
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let http = if args.offline {
        None
    } else {
        match HttpSource::new() {
            Ok(source) => Some(source),
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    };
    let source = http.as_ref().map(|s| s as &dyn RemoteSource);

    let options = PipelineOptions {
        save_model: args.save_model.clone(),
    };
    match pipeline::run(&config, source, &options) {
        Ok(report) => {
            print_report(&config, &report);
            println!("> Finished in {:.2?}", start_time.elapsed());
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn resolve_config(args: &Args) -> Result<PipelineConfig, gradeband::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.data.data_dir = dir.clone();
    }
    if let Some(dir) = &args.results_dir {
        config.output.results_dir = dir.clone();
    }
    if args.macro_features {
        config.macro_features.enabled = true;
    }
    if args.grid_search {
        config.model.grid_search = true;
    }
    Ok(config)
}

fn print_report(config: &PipelineConfig, report: &PipelineReport) {
    let analysis = &config.analysis;
    let evaluation = &report.classifier.evaluation;
    println!();
    println!(
        "Rows: {} loaded, {} after cleaning; {} feature columns",
        report.raw_rows, report.cleaned_rows, report.feature_columns
    );
    if !report.macro_columns.is_empty() {
        println!("Macro features: {}", report.macro_columns.join(", "));
    }
    println!("Accuracy: {:.4}", evaluation.accuracy);
    println!();
    println!("Classification report:");
    print!("{}", evaluation.report);
    println!();
    println!("Confusion matrix (rows = actual, columns = predicted):");
    print!("{}", evaluation.confusion);
    println!();
    println!(
        "Welch's t-test of {} by {} ({} vs {}): {}",
        analysis.grade_column,
        analysis.group_column,
        analysis.first_group,
        analysis.second_group,
        report.group_test
    );
    println!();
    println!("Predictions: {}", report.predictions.display());
    println!("Charts:");
    for path in [
        &report.plots.grade_distribution,
        &report.plots.correlation_heatmap,
        &report.plots.studytime_boxplot,
    ] {
        println!("  {}", path.display());
    }
}
