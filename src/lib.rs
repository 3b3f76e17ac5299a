//! Map AlphaMissense pathogenicity onto AlphaFold structures.
//!
//! Variant tables are reduced to one mean score per residue, which then replaces
//! the B-factor (pLDDT) column of the predicted structure so any viewer that
//! colors by B-factor shows pathogenicity instead. The same aggregates feed two
//! plot tables: a long-form substitution heatmap and a pLDDT comparison.

pub mod aggregate;
pub mod dataset;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod source;
pub mod structure;
pub mod variant;

pub use aggregate::{ResidueAggregate, ResidueAggregates};
pub use error::PipelineError;
pub use variant::VariantRecord;
