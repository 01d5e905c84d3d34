//! Short link service
//!
//! CRUD for a user's short links plus public code resolution for redirects.
//! Links are only visible to and editable by their owner; other users get
//! `NotFound`, never `Forbidden`.

use crate::db::is_unique_violation;
use crate::db::repositories::ShortLinkRepository;
use crate::models::{ListParams, PagedResult, ShortLink};
use crate::services::validation::{self, ValidationError};
use anyhow::Context;
use rand::RngCore;
use std::sync::Arc;

/// Attempts at finding an unused random code before giving up
const GENERATE_ATTEMPTS: usize = 5;

/// Error types for short link operations
#[derive(Debug, thiserror::Error)]
pub enum ShortLinkError {
    #[error("Short link not found")]
    NotFound,

    #[error("Short code '{0}' is already taken")]
    ShortCodeTaken(String),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Random 8-character lowercase hex code
pub fn generate_short_code() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// A UNIQUE violation means another request claimed `code` after our check
fn taken_or_internal(err: anyhow::Error, code: &str, context: &'static str) -> ShortLinkError {
    if is_unique_violation(&err) {
        ShortLinkError::ShortCodeTaken(code.to_string())
    } else {
        ShortLinkError::InternalError(err.context(context))
    }
}

/// Short link service
pub struct ShortLinkService {
    repo: Arc<dyn ShortLinkRepository>,
}

impl ShortLinkService {
    pub fn new(repo: Arc<dyn ShortLinkRepository>) -> Self {
        Self { repo }
    }

    /// Create a link. Without a code, a random unused one is picked.
    pub async fn create(
        &self,
        user_id: i64,
        url: &str,
        short_code: Option<&str>,
    ) -> Result<ShortLink, ShortLinkError> {
        let valid = validation::short_link(url, short_code)?;

        let code = match valid.short_code {
            Some(code) => {
                self.ensure_available(&code).await?;
                code
            }
            None => self.unused_code().await?,
        };

        let link = self
            .repo
            .create(user_id, &valid.url, &code)
            .await
            .map_err(|e| taken_or_internal(e, &code, "Failed to create short link"))?;

        tracing::debug!(user_id, link_id = link.id, short_code = %link.short_code, "Short link created");

        Ok(link)
    }

    /// One page of the user's links, newest first
    pub async fn list_for_user(
        &self,
        user_id: i64,
        params: &ListParams,
    ) -> Result<PagedResult<ShortLink>, ShortLinkError> {
        let params = ListParams::new(params.page, params.per_page);
        let (items, total) = self
            .repo
            .list_by_user(user_id, &params)
            .await
            .context("Failed to list short links")?;

        Ok(PagedResult::new(items, total, &params))
    }

    /// Look up a link by its public code
    pub async fn resolve(&self, short_code: &str) -> Result<Option<ShortLink>, ShortLinkError> {
        let link = self
            .repo
            .get_by_code(short_code)
            .await
            .context("Failed to resolve short code")?;

        Ok(link)
    }

    /// Get one of the user's links
    pub async fn get_for_user(&self, user_id: i64, id: i64) -> Result<ShortLink, ShortLinkError> {
        self.repo
            .get_by_id(id)
            .await
            .context("Failed to get short link")?
            .filter(|link| link.user_id == user_id)
            .ok_or(ShortLinkError::NotFound)
    }

    /// Change destination and/or code. A missing code keeps the current one.
    pub async fn update(
        &self,
        user_id: i64,
        id: i64,
        url: &str,
        short_code: Option<&str>,
    ) -> Result<ShortLink, ShortLinkError> {
        let mut link = self.get_for_user(user_id, id).await?;
        let valid = validation::short_link(url, short_code)?;

        if let Some(code) = valid.short_code {
            if code != link.short_code {
                self.ensure_available(&code).await?;
                link.short_code = code;
            }
        }
        link.url = valid.url;

        let updated = self
            .repo
            .update(&link)
            .await
            .map_err(|e| taken_or_internal(e, &link.short_code, "Failed to update short link"))?;

        Ok(updated)
    }

    pub async fn delete(&self, user_id: i64, id: i64) -> Result<(), ShortLinkError> {
        let deleted = self
            .repo
            .delete(id, user_id)
            .await
            .context("Failed to delete short link")?;

        if !deleted {
            return Err(ShortLinkError::NotFound);
        }
        Ok(())
    }

    async fn ensure_available(&self, code: &str) -> Result<(), ShortLinkError> {
        if self
            .repo
            .exists_by_code(code)
            .await
            .context("Failed to check short code")?
        {
            return Err(ShortLinkError::ShortCodeTaken(code.to_string()));
        }
        Ok(())
    }

    async fn unused_code(&self) -> Result<String, ShortLinkError> {
        for _ in 0..GENERATE_ATTEMPTS {
            let code = generate_short_code();
            if !self
                .repo
                .exists_by_code(&code)
                .await
                .context("Failed to check short code")?
            {
                return Ok(code);
            }
        }
        Err(anyhow::anyhow!("No unused short code after {} attempts", GENERATE_ATTEMPTS).into())
    }
}
