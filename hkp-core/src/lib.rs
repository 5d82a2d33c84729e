//! # hkp-core
//!
//! Core library for the HKP leakage simulation.
//!
//! A structured instruction is obfuscated into a tagged bundle, recovered,
//! probed by an adversarial mimic, scored for leakage, and the score is
//! calibrated into the parameters of the next round. This crate provides
//! the stages of that loop, the pipeline driving it, the wire messages of
//! the round service, and the security primitives both sides share.

pub mod calibrator;
pub mod derive;
pub mod error;
pub mod leakage;
pub mod message;
pub mod mimic;
pub mod model;
pub mod obfuscator;
pub mod oracle;
pub mod params;
pub mod pipeline;
pub mod recoverer;
pub mod security;
pub mod state;
pub mod transform;

pub use calibrator::{Calibration, CalibrationMode, Calibrator, HkpEffectiveness};
pub use derive::{derive_token, Token};
pub use error::{FailureCode, HkpError, HkpResult};
pub use leakage::{LeakageScorer, LeakageWeights};
pub use message::{RoundRequest, RoundResponse, RoundResult};
pub use mimic::{assess_exposure, generate_mimic, ExposureProfile};
pub use model::{
    LeakageFactors, LeakageReport, MimicBundle, Protection, RecoveredFields, RoleLevel,
    StructuredInput, TaggedBundle,
};
pub use obfuscator::{obfuscate_input, obfuscate_input_at};
pub use oracle::{Candidate, NoOracle, Oracle, Stage};
pub use params::{ParameterRangeWarning, ParameterSet};
pub use pipeline::{Pipeline, PipelineConfig, RoundOutcome};
pub use recoverer::Recoverer;
pub use security::{
    check_replay, integrity_tag, sign_request, verify_integrity, verify_request_signature,
};
pub use state::{
    ClientEvent, ClientState, RoundEvent, RoundStage, RoundTracker, SessionEvent, SessionState,
};

pub use ed25519_dalek::{SigningKey, VerifyingKey};

/// Protocol version
pub const PROTOCOL_VERSION: &str = "0.1";
