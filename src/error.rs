use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the metadata store")]
    Metadata,
    #[display("could not open the blob store")]
    Storage,
    #[display("{_0}")]
    Usage(#[error(not(source))] &'static str),
    #[display("{} is {size} bytes, the upload limit is {limit}", path.display())]
    TooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    #[display("I/O error on {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    #[display("operation failed")]
    Vault,
    #[display("could not write output")]
    Output,
}
