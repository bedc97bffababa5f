//! Application services: the workflows the HTTP edge calls into.

pub mod checkout;
pub mod orders;
pub mod retention;

pub use checkout::{CheckoutService, CheckoutView, DraftKey, DraftStore, SubmitResult};
pub use orders::OrderService;
pub use retention::{spawn_sweeper, Retention};
