use crate::permissions::Permissions;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("gateway is already open")]
    AlreadyOpen,

    #[error("timed out waiting for the first ready event")]
    OpenTimeout,

    #[error("gateway is not open")]
    NotOpen,

    #[error("handle is offline")]
    Offline,

    #[error("gateway transport failure: {0}")]
    Transport(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("user is missing permissions")]
    NoPermission { has: Permissions, wanted: Permissions },

    #[error("persistence error: {0}")]
    Persist(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
