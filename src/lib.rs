//! Crate root: public surface and the one configuration-shaped input type
//!
//! This module is the single canonical entry point for downstream users of
//! the library. It re-exports the submodules that implement the bisimulation
//! checker and centralizes the small `RunConfig` struct a hosting program
//! deserializes to drive one run, the way the teacher centralizes
//! `StreamError` and the `Prover`/`Verifier` orchestrators at the crate root.
//!
//! ## Invariants
//!
//! - No unsafe code anywhere in this crate.
//! - The engine never talks to a concrete SMT solver; it only ever calls
//!   through [`solver::SolverOracle`] (§5, §6). Wiring up an actual solver
//!   portfolio is a hosting program's job, not this crate's.
//! - A bisimulation run either returns `Equivalent` with the explored
//!   certificate or `Disagreement` with a reconstructed counterexample; a
//!   partial worklist is never surfaced as a result (§4.9).

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

/// Bit-vector expression DAG (§3, §4.2).
pub mod bitvec;
/// Crate-wide error taxonomy (§7).
pub mod error;
/// Parser IR: types, states, operation blocks, transition blocks (§3, §4.1).
pub mod ir;
/// IR-JSON ingestion (§6).
pub mod ir_json;
/// Pure formula, formula manager, guarded formula (§3, §4.3).
pub mod formula;
/// Strongest-postcondition transformer (§4.4).
pub mod sp;
/// Symbolic transition enumerator (§4.5).
pub mod transition;
/// Constraint-language compiler (§4.6).
pub mod constraint;
/// Abstract SMT solver oracle interface (§5, §6).
pub mod solver;
/// The bisimulation engine (§4.7, §4.8).
pub mod engine;

pub use crate::engine::{BisimResult, BisimulationConfig, CertificateEntry, Counterexample, TraceStep};
pub use crate::error::EngineError;
pub use crate::ir::ParserProgram;
pub use crate::solver::SolverOracle;

/// The one configuration-shaped input a hosting program deserializes to
/// drive a bisimulation run (§1, §6): which optional filters to apply, the
/// leaps toggle, and whether a found disagreement should be treated as a
/// hard failure by the CLI driver.
///
/// Deserialized with `serde`, the way the teacher deserializes
/// `ProofHeader`/`Proof` — here with derives instead of `ark-serialize`,
/// since there is no curve arithmetic in this domain.
#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct RunConfig {
    /// Mirrors [`engine::BisimulationConfig::enable_leaps`].
    #[serde(default)]
    pub enable_leaps: bool,
    /// Source text for the optional disagreeing-filter relation (§4.6).
    #[serde(default)]
    pub disagreeing_filter: Option<String>,
    /// Source text for the optional accepting-filter relation (§4.6).
    #[serde(default)]
    pub accepting_filter: Option<String>,
    /// When `true`, the CLI driver exits non-zero on a reported disagreement
    /// instead of only printing it (§6 "Exit codes").
    #[serde(default)]
    pub fail_on_mismatch: bool,
}

impl RunConfig {
    /// Parse `disagreeing_filter`/`accepting_filter` (if present) and build
    /// the engine-level config. Parse errors surface as [`EngineError`] the
    /// same way a malformed IR document or unsafe constraint would.
    pub fn to_engine_config(&self) -> Result<engine::BisimulationConfig, EngineError> {
        let disagreeing_filter = self
            .disagreeing_filter
            .as_deref()
            .map(constraint::parse)
            .transpose()
            .map_err(EngineError::from)?;
        let accepting_filter = self
            .accepting_filter
            .as_deref()
            .map(constraint::parse)
            .transpose()
            .map_err(EngineError::from)?;
        Ok(engine::BisimulationConfig { enable_leaps: self.enable_leaps, disagreeing_filter, accepting_filter })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_config_defaults_to_no_filters_and_leaps_off() {
        let cfg: RunConfig = serde_json::from_str("{}").unwrap();
        assert!(!cfg.enable_leaps);
        assert!(cfg.disagreeing_filter.is_none());
        assert!(cfg.accepting_filter.is_none());
    }

    #[test]
    fn to_engine_config_parses_filters() {
        let cfg = RunConfig {
            enable_leaps: true,
            disagreeing_filter: Some("hdr_l.a == hdr_r.a".to_string()),
            accepting_filter: None,
            fail_on_mismatch: true,
        };
        let engine_cfg = cfg.to_engine_config().unwrap();
        assert!(engine_cfg.enable_leaps);
        assert!(engine_cfg.disagreeing_filter.is_some());
    }

    #[test]
    fn to_engine_config_rejects_unsafe_filter_syntax() {
        let cfg = RunConfig { disagreeing_filter: Some("a + 1".to_string()), ..Default::default() };
        assert!(cfg.to_engine_config().is_err());
    }
}
