//! Market data acquisition: provider trait, HTTP gateways, routing, retry and
//! the per-symbol fetch adapter.

pub mod aktools;
pub mod columns;
pub mod eastmoney;
pub mod fetch;
mod http;
pub mod provider;
pub mod retry;
pub mod route;

pub use aktools::AkToolsProvider;
pub use eastmoney::EastMoneyProvider;
pub use fetch::SymbolFetcher;
pub use provider::{DataError, DataProvider};
pub use retry::{RetryPolicy, Retrying};
pub use route::PriceRouted;
