use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    SequenceTooLong {
        got: usize,
        max: usize,
    },
    TokenOutOfRange {
        token: u32,
        vocab_size: usize,
    },
    EmptyBatch,
    InvalidHyperparameter(String),
    StateKindMismatch {
        got: String,
        expected: &'static str,
    },
    MissingStateBuffer(&'static str),
    Shape(ShapeError),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::SequenceTooLong { got, max } => write!(
                f,
                "The sequence has {got} tokens but the model's context only fits {max}"
            ),
            MlErr::TokenOutOfRange { token, vocab_size } => write!(
                f,
                "Token id {token} is out of range for a vocabulary of {vocab_size} tokens"
            ),
            MlErr::EmptyBatch => write!(f, "Tried to run the model over an empty batch"),
            MlErr::InvalidHyperparameter(msg) => write!(f, "Invalid hyperparameter: {msg}"),
            MlErr::StateKindMismatch { got, expected } => write!(
                f,
                "Tried to load a {got} optimizer state into a {expected} optimizer"
            ),
            MlErr::MissingStateBuffer(name) => {
                write!(f, "The optimizer state is missing the {name} buffer")
            }
            MlErr::Shape(e) => write!(f, "Invalid tensor shape: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}
