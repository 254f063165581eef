//! Minimal CLI driver
//!
//! Reads two IR-JSON documents (left/right parser programs), an optional
//! `RunConfig` JSON file, runs the bisimulation engine, and prints the
//! verdict. A thin pass-through over the library, the way `prover.rs`/
//! `verifier.rs` are thin wrappers over `scheduler::Prover`/`Verifier`: this
//! binary owns flag parsing and result formatting, nothing else.

#![forbid(unsafe_code)]

use std::{env, fs};

use p4bisim::{BisimResult, RunConfig};

fn parse_flag(args: &[String], key: &str) -> Option<String> {
    let mut it = args.iter();
    while let Some(a) = it.next() {
        if a == key {
            return it.next().cloned();
        }
    }
    None
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    let left_path = parse_flag(&args, "--left").ok_or_else(|| anyhow::anyhow!("missing required --left <ir-json path>"))?;
    let right_path = parse_flag(&args, "--right").ok_or_else(|| anyhow::anyhow!("missing required --right <ir-json path>"))?;

    let mut run_config = match parse_flag(&args, "--config") {
        Some(path) => {
            let text = fs::read_to_string(&path).map_err(|e| anyhow::anyhow!("read config {path}: {e}"))?;
            serde_json::from_str::<RunConfig>(&text).map_err(|e| anyhow::anyhow!("parse config {path}: {e}"))?
        }
        None => RunConfig::default(),
    };
    if has_flag(&args, "--leaps") {
        run_config.enable_leaps = true;
    }
    if has_flag(&args, "--fail-on-mismatch") {
        run_config.fail_on_mismatch = true;
    }
    if let Some(disagree) = parse_flag(&args, "--disagreeing-filter") {
        run_config.disagreeing_filter = Some(disagree);
    }
    if let Some(accept) = parse_flag(&args, "--accepting-filter") {
        run_config.accepting_filter = Some(accept);
    }

    let left_text = fs::read_to_string(&left_path).map_err(|e| anyhow::anyhow!("read {left_path}: {e}"))?;
    let right_text = fs::read_to_string(&right_path).map_err(|e| anyhow::anyhow!("read {right_path}: {e}"))?;
    let left_doc: serde_json::Value = serde_json::from_str(&left_text).map_err(|e| anyhow::anyhow!("parse {left_path}: {e}"))?;
    let right_doc: serde_json::Value = serde_json::from_str(&right_text).map_err(|e| anyhow::anyhow!("parse {right_path}: {e}"))?;

    let left = p4bisim::ir_json::parse_program(&left_doc, p4bisim::bitvec::Side::Left)?;
    let right = p4bisim::ir_json::parse_program(&right_doc, p4bisim::bitvec::Side::Right)?;

    let engine_config = run_config.to_engine_config()?;

    let mut oracle = make_oracle(&args)?;
    let result = p4bisim::engine::check_bisimulation(&left, &right, &engine_config, oracle.as_mut())?;

    match result {
        BisimResult::Equivalent { certificate } => {
            println!("EQUIVALENT");
            println!("explored {} guarded formula(s)", certificate.len());
            Ok(())
        }
        BisimResult::Disagreement(cex) => {
            println!("DISAGREEMENT");
            for step in &cex.trace {
                println!("  ({}, {}) buf=({}, {})", step.state_l, step.state_r, step.buf_len_l, step.buf_len_r);
            }
            println!("witness stream: 0x{:x} ({} bits)", cex.stream, cex.stream_width);
            if run_config.fail_on_mismatch {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

#[cfg(feature = "dev-solver")]
fn make_oracle(_args: &[String]) -> anyhow::Result<Box<dyn p4bisim::SolverOracle>> {
    Ok(Box::new(p4bisim::solver::reference_oracle::BruteForceOracle::new()))
}

#[cfg(not(feature = "dev-solver"))]
fn make_oracle(_args: &[String]) -> anyhow::Result<Box<dyn p4bisim::SolverOracle>> {
    Err(anyhow::anyhow!(
        "no SolverOracle backend is wired in. This crate deliberately ships no production \
         solver integration (see spec §1); rebuild with --features dev-solver for a small \
         brute-force reference oracle suitable for demos, or link a real SMT-backed \
         SolverOracle yourself and call p4bisim::engine::check_bisimulation directly."
    ))
}
