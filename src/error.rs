use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Library-level error type.
///
/// Most dissection failures are *not* represented here: a malformed frame
/// is a non-fatal, countable event, not a propagated error — see
/// [`crate::dissect::Frame::parse`], which returns a best-effort `Frame`
/// with an `EtherType::Error` sentinel rather than an `Err`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("could not parse filter line {line}: {reason}")]
    BadFilter { line: String, reason: String },
}
