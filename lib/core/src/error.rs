//! Error handling foundation for caseflow.
//!
//! Each crate defines its own error enum in its own `error` module. Service
//! boundaries wrap those enums in a rootcause `Report` so callers can attach
//! context as the error travels up.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
