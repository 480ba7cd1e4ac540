//! Result type alias for configuration loading operations

use crate::error::LoadError;

/// Standard Result type for configuration loading operations
pub type Result<T> = std::result::Result<T, LoadError>;
