//! # Tenant Resolution
//!
//! Supplies the acting user's `company_id` to every store.
//!
//! Stores ask the resolver at the start of each operation. A `None` or a
//! non-positive id is a precondition failure: the operation ends without a
//! backend call.

use std::sync::{PoisonError, RwLock};

use hris_core::TenantId;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Source of the current company id.
pub trait TenantResolver: Send + Sync {
    /// Raw company id of the acting user, if any.
    fn company_id(&self) -> Option<i64>;

    /// Validated tenant.
    fn tenant(&self) -> StoreResult<TenantId> {
        TenantId::try_from_raw(self.company_id()).map_err(|_| StoreError::MissingTenant)
    }
}

/// A tenant fixed for the lifetime of the resolver (tools, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedTenant(pub Option<i64>);

impl FixedTenant {
    pub fn new(company_id: i64) -> Self {
        FixedTenant(Some(company_id))
    }

    /// A resolver that never has a tenant.
    pub fn none() -> Self {
        FixedTenant(None)
    }
}

impl TenantResolver for FixedTenant {
    fn company_id(&self) -> Option<i64> {
        self.0
    }
}

/// Tenant of the signed-in user. Set at sign-in, cleared at sign-out.
#[derive(Debug, Default)]
pub struct SessionTenant {
    company_id: RwLock<Option<i64>>,
}

impl SessionTenant {
    pub fn new(company_id: Option<i64>) -> Self {
        SessionTenant {
            company_id: RwLock::new(company_id),
        }
    }

    pub fn set(&self, company_id: i64) {
        info!(company_id, "Tenant set");
        *self.company_id.write().unwrap_or_else(PoisonError::into_inner) = Some(company_id);
    }

    pub fn clear(&self) {
        info!("Tenant cleared");
        *self.company_id.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl TenantResolver for SessionTenant {
    fn company_id(&self) -> Option<i64> {
        *self.company_id.read().unwrap_or_else(PoisonError::into_inner)
    }
}
