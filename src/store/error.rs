use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot read file")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
}
