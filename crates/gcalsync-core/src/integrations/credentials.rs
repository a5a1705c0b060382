//! Per-account OAuth tokens kept in the local index.

use std::cell::RefCell;
use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::oauth::{self, OAuthConfig, OAuthTokens};
use super::traits::CredentialBroker;
use crate::error::{IndexError, OAuthError, Result};
use crate::storage::IndexStore;

/// Broker backed by the `account_tokens` table.
///
/// Expired tokens are refreshed and written back. An account without a stored
/// token goes through the browser flow the first time it is needed.
pub struct StoreTokenBroker<'a> {
    store: &'a IndexStore,
    oauth: OAuthConfig,
    cache: RefCell<HashMap<String, OAuthTokens>>,
}

impl<'a> StoreTokenBroker<'a> {
    pub fn new(store: &'a IndexStore, oauth: OAuthConfig) -> Self {
        Self {
            store,
            oauth,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Stored tokens for `account`, if any.
    pub fn load_tokens(&self, account: &str) -> Result<Option<OAuthTokens>> {
        let Some(json) = self.store.account_token(account)? else {
            return Ok(None);
        };
        let tokens = serde_json::from_str(&json).map_err(|e| IndexError::Corrupt {
            table: "account_tokens",
            message: format!("{account}: {e}"),
        })?;
        Ok(Some(tokens))
    }

    /// Run the browser flow for `account` and store the result.
    pub async fn authorize(&self, account: &str) -> Result<OAuthTokens> {
        let tokens = oauth::authorize(&self.oauth, account).await?;
        self.save(account, &tokens)?;
        info!(account, "account authorized");
        Ok(tokens)
    }

    fn save(&self, account: &str, tokens: &OAuthTokens) -> Result<()> {
        let json = serde_json::to_string(tokens).map_err(|e| IndexError::QueryFailed(e.to_string()))?;
        self.store.set_account_token(account, &json)?;
        self.cache
            .borrow_mut()
            .insert(account.to_string(), tokens.clone());
        Ok(())
    }

    async fn fresh_tokens(&self, account: &str) -> Result<OAuthTokens> {
        let tokens = match self.load_tokens(account)? {
            Some(tokens) => tokens,
            None => return self.authorize(account).await,
        };
        if !oauth::is_expired(&tokens) {
            return Ok(tokens);
        }

        debug!(account, "refreshing access token");
        let refresh = tokens
            .refresh_token
            .as_deref()
            .ok_or_else(|| OAuthError::TokenExpired(account.to_string()))?;
        let refreshed = oauth::refresh_token(&self.oauth, account, refresh).await?;
        self.save(account, &refreshed)?;
        Ok(refreshed)
    }
}

#[async_trait(?Send)]
impl CredentialBroker for StoreTokenBroker<'_> {
    async fn access_token(&self, account: &str) -> Result<String> {
        let cached = self.cache.borrow().get(account).cloned();
        if let Some(tokens) = cached {
            if !oauth::is_expired(&tokens) {
                return Ok(tokens.access_token);
            }
        }
        let tokens = self.fresh_tokens(account).await?;
        self.cache
            .borrow_mut()
            .insert(account.to_string(), tokens.clone());
        Ok(tokens.access_token)
    }

    /// Drop the cached token and mark the stored one expired, so the next
    /// [`access_token`](CredentialBroker::access_token) refreshes it.
    fn invalidate(&self, account: &str) {
        self.cache.borrow_mut().remove(account);
        let expired = match self.load_tokens(account) {
            Ok(Some(tokens)) => OAuthTokens {
                expires_at: Some(0),
                ..tokens
            },
            Ok(None) => return,
            Err(e) => {
                warn!(account, error = %e, "cannot read stored token to invalidate it");
                return;
            }
        };
        match serde_json::to_string(&expired) {
            Ok(json) => {
                if let Err(e) = self.store.set_account_token(account, &json) {
                    warn!(account, error = %e, "cannot mark stored token expired");
                }
            }
            Err(e) => warn!(account, error = %e, "cannot encode token"),
        }
    }
}
