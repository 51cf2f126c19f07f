//! Shared value model for tabflow.
//!
//! [`flex_type`] holds the scalar cell type, [`chunk`] the columnar batch
//! that flows through every pass, and [`error`] the crate-wide error.

pub mod chunk;
pub mod error;
pub mod flex_type;
