//! Services layer - Business logic
//!
//! Services own the account and token rules and coordinate repositories.
//! Each has its own `thiserror` error enum; storage failures arrive as
//! `anyhow::Error` inside an `InternalError` variant.

pub mod auth;
pub mod email;
pub mod ephemeral_token;
pub mod password;
pub mod short_link;
pub mod token;
pub mod user;
pub mod validation;
pub mod verification;

pub use auth::{AuthCookies, AuthError, AuthService, AuthSettings, Identity, Resolution};
pub use email::{
    dispatch_best_effort, DeliveryHandle, EmailSender, EmailTemplates, OutgoingEmail, SendError,
    SmtpEmailSender,
};
pub use ephemeral_token::{EphemeralTokenError, EphemeralTokenStore, IssuedToken, TokenLifetimes};
pub use password::{hash_password, verify_password};
pub use short_link::{ShortLinkError, ShortLinkService};
pub use token::{AccessClaims, RefreshClaims, TokenCodec, TokenError, TokenKind, Verified};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
pub use validation::ValidationError;
pub use verification::{VerificationError, VerificationService};
