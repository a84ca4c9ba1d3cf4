use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire array engine.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// The array engine's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineErr {
    ShapeMismatch {
        op: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    AxisOutOfBounds {
        axis: usize,
        ndim: usize,
    },
    IndexOutOfBounds {
        index: usize,
        len: usize,
    },
    InvalidReshape {
        from: Vec<usize>,
        to: Vec<usize>,
    },
    InvalidExtent {
        ul: Vec<usize>,
        lr: Vec<usize>,
        array_shape: Vec<usize>,
    },
    EmptyReduction {
        op: &'static str,
    },
    InvalidArgument(&'static str),
    Config(String),
    ThreadPool(String),
}

impl Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErr::ShapeMismatch { op, lhs, rhs } => {
                write!(f, "shape mismatch in {op}: {lhs:?} and {rhs:?}")
            }
            EngineErr::AxisOutOfBounds { axis, ndim } => {
                write!(f, "axis {axis} is out of bounds for an array of {ndim} dimensions")
            }
            EngineErr::IndexOutOfBounds { index, len } => {
                write!(f, "index {index} is out of bounds for an axis of length {len}")
            }
            EngineErr::InvalidReshape { from, to } => {
                write!(f, "cannot reshape an array of shape {from:?} into {to:?}")
            }
            EngineErr::InvalidExtent {
                ul,
                lr,
                array_shape,
            } => write!(
                f,
                "invalid extent ul = {ul:?}, lr = {lr:?} for an array of shape {array_shape:?}"
            ),
            EngineErr::EmptyReduction { op } => {
                write!(f, "{op} of an empty sequence is undefined")
            }
            EngineErr::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineErr::Config(msg) => write!(f, "invalid engine config: {msg}"),
            EngineErr::ThreadPool(msg) => write!(f, "failed to build the worker pool: {msg}"),
        }
    }
}

impl Error for EngineErr {}
