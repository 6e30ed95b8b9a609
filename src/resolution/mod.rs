//! Observation-to-entity resolution.
//!
//! - [`matcher`]: finds the existing entity an observation refers to
//! - [`linker`]: creates entities and links observations to them
//! - [`synthesizer`]: recomputes an entity's derived state
//! - [`driver`]: runs a batch; the entry point callers use

pub mod driver;
pub mod linker;
pub mod matcher;
pub mod synthesizer;

pub use driver::{Resolution, Resolver, ResolverConfig, RunReport};
pub use synthesizer::{synthesize, Synthesis};
