use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use engine::EngineErr;

/// The result type used in the entire pricer.
pub type Result<T> = std::result::Result<T, SwaptionErr>;

/// The pricer's error type.
#[derive(Debug)]
pub enum SwaptionErr {
    Engine(EngineErr),
    Config(String),
    Io(io::Error),
}

impl Display for SwaptionErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwaptionErr::Engine(e) => write!(f, "array engine error: {e}"),
            SwaptionErr::Config(msg) => write!(f, "invalid pricer config: {msg}"),
            SwaptionErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for SwaptionErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SwaptionErr::Engine(e) => Some(e),
            SwaptionErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineErr> for SwaptionErr {
    fn from(e: EngineErr) -> Self {
        SwaptionErr::Engine(e)
    }
}

impl From<io::Error> for SwaptionErr {
    fn from(e: io::Error) -> Self {
        SwaptionErr::Io(e)
    }
}

impl From<SwaptionErr> for io::Error {
    fn from(e: SwaptionErr) -> Self {
        match e {
            SwaptionErr::Io(e) => e,
            SwaptionErr::Config(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            SwaptionErr::Engine(_) => io::Error::other(e),
        }
    }
}
