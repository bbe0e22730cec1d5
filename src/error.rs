// src/error.rs
use thiserror::Error;

/// Status returned by a single step of compilation, the executor, or
/// printer-state persistence. Named after `PRINTER_STATUS_Type`'s kind list,
/// not its numeric codes.
#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("control block guard does not match")]
    InvalidControlBlock,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("a print is already in progress")]
    AlreadyStarted,
    #[error("block store failure: {0}")]
    SdcardFailure(String),
    #[error("compile cache has no free page for a new region")]
    RamFailure,
    #[error("executor reached the last record of the main page; preload pending")]
    PreloadRequired,
    #[error("internal storage transiently busy")]
    Skip,
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("file is not valid g-code")]
    FileNotGcode,
    #[error("file is not a valid material definition")]
    FileNotMaterial,
    #[error("g-code line exceeds the maximum line length")]
    GcodeLineTooLong,
    #[error("material table has no free or matching slot")]
    TooManyMaterials,
    #[error("g-code parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Classification of a single parsed G-code line (§4.1). Kept distinct from
/// `FirmwareError` because `NoCommand`/`UnknownParameter` are routine
/// classification outcomes, not failures the caller necessarily propagates
/// with `?` — the compiler matches on them directly before deciding whether
/// to surface an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line did not resolve to a command (comment or blank)")]
    NoCommand,
    #[error("command index is not one this core recognizes")]
    UnknownCommand,
    #[error("a parameter letter is not accepted by this command")]
    UnknownParameter,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("axis scale factor for {axis} must be nonzero")]
    InvalidAxisScale { axis: &'static str },
}

pub type Result<T> = std::result::Result<T, FirmwareError>;
