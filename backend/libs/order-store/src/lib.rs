//! Durable order state for the processing pipeline.
//!
//! Three concerns live here, mirroring the persisted layout:
//! - [`store`]: the `orders` table, one row per order, mutated only
//!   through atomic single-row statements.
//! - [`events`]: the append-only `order_events` audit trail.
//! - [`intake`]: the transactional contract the façade calls to hand an
//!   order to the pipeline (order row + outbox row in one transaction).

mod error;
pub mod events;
pub mod intake;
pub mod status;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use events::{audit, audit_event, EventLog, SqlxEventLog};
pub use intake::submit_order;
pub use status::OrderStatus;
pub use store::{NewOrder, Order, OrderStore, SqlxOrderStore};
