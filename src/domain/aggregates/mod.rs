//! Aggregates module
pub mod order;
pub mod coupon;
pub mod cart;
pub mod checkout;

pub use order::{Order, OrderError, OrderItem, OrderParts, OrderStatus, PaymentMethod, PaymentStatus, ShippingInfo, StatusColor, UnknownVariant};
pub use coupon::{AppliedCoupon, Coupon, CouponRejection, CouponType};
pub use cart::{Cart, CartItem, ProductSnapshot};
pub use checkout::{CheckoutDraft, CheckoutError, CheckoutStep, FieldErrors, InFlight, NewOrder, OrderTotals};
