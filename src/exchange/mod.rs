//! Exchange connectivity: gateway trait, REST implementation, retry policy.

mod gateway;
mod rest;
mod retry;

pub use gateway::{
    account_health, order_qty, AccountInfo, ExchangeGateway, ExchangePosition, FeeRates,
    HealthReport, HealthStatus, OrderReceipt,
};
pub use rest::{granularity, market_id, RestGateway};
pub use retry::{retry_with_timeout, RetryPolicy};
