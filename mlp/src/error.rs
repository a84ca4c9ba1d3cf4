use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use engine::EngineErr;

/// The result type used in the entire trainer.
pub type Result<T> = std::result::Result<T, MlpErr>;

/// The trainer's error type.
#[derive(Debug)]
pub enum MlpErr {
    Engine(EngineErr),
    Config(String),
    Data(String),
    Io(io::Error),
}

impl Display for MlpErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlpErr::Engine(e) => write!(f, "array engine error: {e}"),
            MlpErr::Config(msg) => write!(f, "invalid trainer config: {msg}"),
            MlpErr::Data(msg) => write!(f, "invalid dataset: {msg}"),
            MlpErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for MlpErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlpErr::Engine(e) => Some(e),
            MlpErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<EngineErr> for MlpErr {
    fn from(e: EngineErr) -> Self {
        MlpErr::Engine(e)
    }
}

impl From<io::Error> for MlpErr {
    fn from(e: io::Error) -> Self {
        MlpErr::Io(e)
    }
}

impl From<MlpErr> for io::Error {
    fn from(e: MlpErr) -> Self {
        match e {
            MlpErr::Io(e) => e,
            MlpErr::Config(_) | MlpErr::Data(_) => io::Error::new(io::ErrorKind::InvalidInput, e),
            MlpErr::Engine(_) => io::Error::other(e),
        }
    }
}
