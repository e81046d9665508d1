//! Petition lifecycle and signature-collection engine.
//!
//! An organizer publishes a petition (title, rich-text body, optional
//! multiple-choice survey questions); signers submit a name, phone number
//! and signature image, at most once per phone; aggregate results are
//! tallied on demand. Petitions may be scheduled to become visible later.
//!
//! This crate holds the domain and the SQLite store. Transport lives in
//! `petition-service`.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod activation;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod model;
pub mod public_id;
pub mod registry;
pub mod results;
pub mod survey;

pub use activation::{Clock, FixedClock, SystemClock, is_visible};
pub use config::PetitionConfig;
pub use engine::PetitionEngine;
pub use errors::{ErrorCategory, PetitionError, Result};
pub use model::{
    Caller, NewOption, NewPetition, NewSurvey, OptionId, OptionTally, Petition, PetitionDetail,
    PetitionId, PetitionResults, PetitionUpdate, QuestionType, ResultsHeader, Signature,
    SignatureId, SignatureSubmission, Survey, SurveyAnswer, SurveyId, SurveyOption, SurveyTally,
    UserId,
};
pub use public_id::PublicId;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
