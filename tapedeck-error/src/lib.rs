//! Error types and utilities for tapedeck.
//!
//! The [`BoxError`] type is a type-erased error type that can be used to represent any error that
//! implements the `std::error::Error` trait and is used for cases where it is usually not
//! that important what specific error type is returned, but rather that an error occurred.
//! Pipeline stages and cache stores return it at their boundaries.
//!
//! Use [`ErrorContext`] to attach a short description of what was being done
//! when an error surfaced, and [`ErrorExt`] to walk back to its root cause.
//!
//! # Example
//!
//! ```
//! use tapedeck_error::{ErrorContext, ErrorExt};
//!
//! let err = "forty-two".parse::<u16>().context("parse status code").unwrap_err();
//! assert_eq!("parse status code: invalid digit found in string", err.to_string());
//! assert_eq!("invalid digit found in string", err.root_cause().to_string());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Alias for a type-erased error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

mod ext;
pub use ext::{ErrorContext, ErrorExt, OpaqueError};
