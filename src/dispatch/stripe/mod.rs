//! Stripe 操作集：目录、HTTP 客户端、分页、测试桩

pub mod catalog;
pub mod client;
pub mod mock;
pub mod pagination;

pub use catalog::{stripe_registry, StripeOperation, STRIPE_NAMESPACE, STRIPE_OPERATIONS};
pub use client::{ApiRequest, HttpMethod, HttpStripeClient, StripeApi, StripeError};
pub use mock::RecordingStripeApi;
