//! Push delivery gateways.
//!
//! The engine talks to providers only through [`DeliveryGateway`]; the Expo
//! push service is the production implementation.

pub mod expo;

use async_trait::async_trait;

use herald_common::error::AppError;
use herald_common::types::{DeliveryResult, PushMessage};

pub use expo::ExpoGateway;

/// A batched push provider.
#[async_trait]
pub trait DeliveryGateway: Send + Sync {
    /// Whether the gateway has the credentials it needs. A sweep is skipped
    /// while this returns `AppError::Config`.
    fn ready(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// Send one batch. Results are returned in message order; a request-level
    /// failure is returned as `Err` and applies to the whole batch.
    async fn send(&self, batch: &[PushMessage]) -> Result<Vec<DeliveryResult>, AppError>;
}
