//! Database entities

pub mod refresh_token;
pub mod tunnel;
pub mod user;

pub use refresh_token::Entity as RefreshToken;
pub use tunnel::Entity as Tunnel;
pub use user::Entity as User;

pub mod prelude {
    pub use super::refresh_token::Entity as RefreshToken;
    pub use super::tunnel::Entity as Tunnel;
    pub use super::user::Entity as User;
}
