mod client;
mod error;
pub mod models;
mod sources;
pub mod transform;

pub use client::{SquareClient, SquareClientConfig};
pub use error::{SquareError, SquareResult};
pub use sources::{CatalogSource, CustomersSource, OrdersSource, PaymentsSource};
