//! Brokerage seam and scoped login/logout around one operation.

use std::future::Future;

use tracing::{info, warn};

use crate::error::HistoryError;
use crate::types::{Credentials, RawOrder};
use crate::utils::mask_user;

/// The external account the order history is read from.
///
/// Sessions are explicit handles: whatever `login` returns is what `logout`
/// tears down, with no hidden process-wide session.
#[allow(async_fn_in_trait)]
pub trait Brokerage {
    type Session: Clone;

    /// Any failure here (rejected credentials, transport) is an
    /// `Authentication` error.
    async fn login(&self, credentials: &Credentials) -> Result<Self::Session, HistoryError>;

    async fn logout(&self, session: Self::Session) -> Result<(), HistoryError>;

    /// Every option order on the account, unfiltered.
    async fn option_orders(&self, session: &Self::Session) -> Result<Vec<RawOrder>, HistoryError>;
}

/// Run `op` inside an authenticated session. Logout always runs once login has
/// succeeded; its failure is logged and never replaces `op`'s result.
pub async fn with_session<B, T, F, Fut>(
    broker: &B,
    credentials: &Credentials,
    op: F,
) -> Result<T, HistoryError>
where
    B: Brokerage,
    F: FnOnce(B::Session) -> Fut,
    Fut: Future<Output = Result<T, HistoryError>>,
{
    let user = mask_user(&credentials.username);
    info!(user = %user, "Logging into brokerage.");
    let session = broker.login(credentials).await?;

    let result = op(session.clone()).await;

    info!(user = %user, "Logging out from brokerage.");
    if let Err(e) = broker.logout(session).await {
        warn!(user = %user, error = %e, "logout failed");
    }
    result
}
