use thiserror::Error;
use uplink_validate::SubdomainError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid subdomain: {0}")]
    InvalidSubdomain(#[from] SubdomainError),

    #[error("local port must be between 1 and 65535")]
    InvalidPort,

    #[error("subdomain is already taken")]
    SubdomainTaken,

    #[error("tunnel not found")]
    NotFound,

    #[error("tunnel belongs to another user")]
    Unauthorized,

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}
