// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CLI front-end: loads a JSON experiment configuration and prints a
//! human-readable report (spec §6).

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use storage_explorer::config::ExperimentConfig;

/// Runs storage-engine micro-benchmarks driven by a JSON configuration file.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the experiment configuration JSON file.
    config_path: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let config = match ExperimentConfig::load(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    for run in 0..config.num_runs {
        let report = match config.run() {
            Ok(report) => report,
            Err(e) => {
                eprintln!("error: {e}");
                return ExitCode::FAILURE;
            }
        };
        println!(
            "run {run}: table={:?} tuples={} blocks={} load={:?}",
            report.table, report.num_tuples_loaded, report.num_blocks, report.load_elapsed
        );
        for test in &report.tests {
            println!(
                "  predicate_column={} matched={} elapsed={:?}",
                test.predicate_column, test.matched_tuples, test.elapsed
            );
        }
    }

    ExitCode::SUCCESS
}
