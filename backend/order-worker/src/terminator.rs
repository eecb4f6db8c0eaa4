//! Pipeline completion: handover to a driver.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::{info, warn};

use gateway_client::{DriverNotification, Gateway};
use order_store::{audit, audit_event, EventLog, OrderStatus, OrderStore};

/// Finalizes a successfully processed order: transitions it to
/// `READY_FOR_DRIVER`, picks and CAS-assigns a driver, and pushes the
/// assignment to the driver's live channel.
pub struct Terminator {
    store: Arc<dyn OrderStore>,
    events: Arc<dyn EventLog>,
    gateway: Arc<dyn Gateway>,
}

impl Terminator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        events: Arc<dyn EventLog>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            store,
            events,
            gateway,
        }
    }

    pub async fn finalize(&self, order_id: &str) -> Result<()> {
        self.store
            .update_status(order_id, OrderStatus::ReadyForDriver, None, false)
            .await
            .context("failed to mark order ready for driver")?;
        audit(
            self.events.as_ref(),
            order_id,
            audit_event::READY_FOR_DRIVER,
            json!({}),
        )
        .await;
        self.gateway
            .push_status(order_id, OrderStatus::ReadyForDriver.as_str())
            .await;

        match self
            .store
            .pick_driver()
            .await
            .context("failed to look up driver candidates")?
        {
            Some(candidate) => {
                // CAS: a concurrent replay may have assigned already; the
                // effective driver is whoever won.
                let driver_id = self
                    .store
                    .assign_driver_if_absent(order_id, &candidate)
                    .await
                    .context("failed to assign driver")?;

                info!(order_id = %order_id, driver_id = %driver_id, "Driver assigned");
                audit(
                    self.events.as_ref(),
                    order_id,
                    audit_event::DRIVER_ASSIGNED,
                    json!({ "driver_id": driver_id }),
                )
                .await;

                self.gateway
                    .notify_driver(
                        &driver_id,
                        &DriverNotification::new_assignment(
                            order_id,
                            OrderStatus::ReadyForDriver.as_str(),
                        ),
                    )
                    .await;
            }
            None => {
                warn!(order_id = %order_id, "No driver candidates available");
                audit(
                    self.events.as_ref(),
                    order_id,
                    audit_event::DRIVER_ASSIGN_FAILED,
                    json!({ "reason": "no_driver_found" }),
                )
                .await;
            }
        }

        Ok(())
    }
}
