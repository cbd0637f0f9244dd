//! Definition of errors.

use core::fmt;

use std::error::Error;

/// Error used when the dimensions of two related structures disagree.
#[derive(Debug)]
pub struct DimensionMismatchError {
    msg: &'static str,
}

/// Error used when an aggregate quantity is NaN or infinite.
#[derive(Debug)]
pub struct NumericInstabilityError {
    msg: &'static str,
}

/// Error used when a configuration value is malformed or unrecognized.
#[derive(Debug)]
pub struct ConfigurationError {
    msg: &'static str,
}

/// Error used when the argument is invalid.
#[derive(Debug)]
pub struct InvalidArgumentError {
    msg: &'static str,
}

/// Error used when a table or index would exceed the representable range.
#[derive(Debug)]
pub struct ModelScaleError {
    msg: &'static str,
}

/// The error type for chaincrf.
///
/// Every variant is a programming or data-integrity error: there is no
/// retry policy and no partial-result mode.
#[derive(Debug)]
pub enum ChaincrfError {
    /// Shapes of related structures disagree (weight row too short, unknown
    /// feature or label id, wrong window length).
    DimensionMismatch(DimensionMismatchError),

    /// An aggregate log-likelihood became NaN or infinite.
    NumericInstability(NumericInstabilityError),

    /// A configuration value is malformed or unrecognized.
    Configuration(ConfigurationError),

    /// An argument is invalid.
    InvalidArgument(InvalidArgumentError),

    /// A table or index would exceed the representable range.
    ModelScale(ModelScaleError),
}

impl fmt::Display for DimensionMismatchError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "DimensionMismatchError: {}", self.msg)
    }
}

impl fmt::Display for NumericInstabilityError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NumericInstabilityError: {}", self.msg)
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ConfigurationError: {}", self.msg)
    }
}

impl fmt::Display for InvalidArgumentError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "InvalidArgumentError: {}", self.msg)
    }
}

impl fmt::Display for ModelScaleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ModelScaleError: {}", self.msg)
    }
}

impl Error for DimensionMismatchError {}
impl Error for NumericInstabilityError {}
impl Error for ConfigurationError {}
impl Error for InvalidArgumentError {}
impl Error for ModelScaleError {}

impl ChaincrfError {
    /// Creates a new [`DimensionMismatchError`].
    pub const fn dimension_mismatch(msg: &'static str) -> Self {
        Self::DimensionMismatch(DimensionMismatchError { msg })
    }

    /// Creates a new [`NumericInstabilityError`].
    pub const fn numeric_instability(msg: &'static str) -> Self {
        Self::NumericInstability(NumericInstabilityError { msg })
    }

    /// Creates a new [`ConfigurationError`].
    pub const fn configuration(msg: &'static str) -> Self {
        Self::Configuration(ConfigurationError { msg })
    }

    /// Creates a new [`InvalidArgumentError`].
    pub const fn invalid_argument(msg: &'static str) -> Self {
        Self::InvalidArgument(InvalidArgumentError { msg })
    }

    /// Creates a new [`ModelScaleError`].
    pub const fn model_scale(msg: &'static str) -> Self {
        Self::ModelScale(ModelScaleError { msg })
    }
}

impl fmt::Display for ChaincrfError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::DimensionMismatch(e) => e.fmt(f),
            Self::NumericInstability(e) => e.fmt(f),
            Self::Configuration(e) => e.fmt(f),
            Self::InvalidArgument(e) => e.fmt(f),
            Self::ModelScale(e) => e.fmt(f),
        }
    }
}

impl Error for ChaincrfError {}

/// A specialized Result type.
pub type Result<T, E = ChaincrfError> = core::result::Result<T, E>;
