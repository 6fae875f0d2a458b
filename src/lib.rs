//! # verigate-rs
//!
//! Verification-challenge resolution engine for browser-automation workflows.
//!
//! Renewal-style automation scripts keep running into the same obstacle: a
//! human-verification challenge (image captcha, embedded widget, managed
//! frame, or inline checkbox) blocking the next step. This crate implements
//! the part of that job with real state and failure modes: classifying the
//! challenge, dispatching it to a solving service, injecting the solution
//! back into the page, verifying it took effect, and retrying under a bounded
//! policy. Navigation, form filling, and the surrounding workflow stay with
//! the caller, reached only through the [`PageDriver`] seam.
//!
//! ## Example
//!
//! ```no_run
//! use verigate_rs::{PageDriver, ResolutionOutcome, Resolver};
//!
//! async fn renew(page: &dyn PageDriver) -> Result<(), Box<dyn std::error::Error>> {
//!     let resolver = Resolver::builder()
//!         .with_ocr_endpoint("https://ocr.example/recognize".parse()?)
//!         .with_token_endpoint("https://api.solver.example/".parse()?)
//!         .with_api_key("client-key")
//!         .build()?;
//!
//!     match resolver.resolve(page).await? {
//!         ResolutionOutcome::Resolved(token) => println!("resolved: {token}"),
//!         ResolutionOutcome::NotPresent => println!("nothing blocking"),
//!         ResolutionOutcome::Failed(reason) => eprintln!("gave up: {reason}"),
//!     }
//!     Ok(())
//! }
//! ```

mod resolver;

pub mod challenges;
pub mod external_deps;
pub mod page;

pub use crate::resolver::{Resolver, ResolverBuilder, ResolverConfig, ResolverError};

pub use crate::challenges::core::{
    ChallengeKind,
    ChallengeObservation,
    InjectionResult,
    Selectors,
    Solution,
};

pub use crate::challenges::detectors::Classifier;

pub use crate::challenges::inject::Injector;

pub use crate::challenges::orchestrator::{Orchestrator, ResolutionOutcome, RetryState};

pub use crate::challenges::solvers::{SolveError, SolverDispatch};

pub use crate::external_deps::captcha::{
    CaptchaConfig,
    CaptchaError,
    HttpOcrClient,
    HttpTaskTransport,
    OcrProvider,
    TaskStatus,
    TaskTransport,
    TokenProvider,
    TokenSolverClient,
    TokenTask,
};

pub use crate::page::{ElementRef, PageDriver, PageError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
