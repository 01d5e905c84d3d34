//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for one entity.

pub mod ephemeral_token;
pub mod oauth_account;
pub mod session;
pub mod short_link;
pub mod user;

pub use ephemeral_token::{EphemeralTokenRepository, Redemption, SqlxEphemeralTokenRepository};
pub use oauth_account::{OAuthAccountRepository, SqlxOAuthAccountRepository};
pub use session::{SessionRepository, SqlxSessionRepository};
pub use short_link::{ShortLinkRepository, SqlxShortLinkRepository};
pub use user::{SqlxUserRepository, UserRepository};
