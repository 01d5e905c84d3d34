//! Data models
//!
//! Database entities and the small input types passed between the API layer
//! and the services.

mod ephemeral_token;
mod oauth;
mod session;
mod short_link;
mod user;

pub use ephemeral_token::{EphemeralToken, TokenPurpose};
pub use oauth::{OAuthAccount, OAuthIdentity};
pub use session::{ClientMeta, Session};
pub use short_link::{ListParams, PagedResult, ShortLink};
pub use user::{UpdateProfileInput, User};
