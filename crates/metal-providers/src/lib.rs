//! Capability interfaces the control plane depends on.
//!
//! Each external collaborator (hardware vendor, DNS provider, payment
//! processor, immutable-OS installer, cell cluster) is consumed through a
//! small trait; concrete vendor adapters live behind them and mocks drive
//! the handler tests. Tagged routing replaces any inheritance hierarchy:
//! the [`CellProviderRegistry`] dispatches on a cell's type.

mod cell;
mod dns;
mod error;
mod payments;
mod server;
mod talos;

pub use cell::{
    AdvanceResult, BuildImageRequest, CellProvider, CellProviderRegistry, CreateCellRequest,
    LogEntry, LogOptions, MockCellProvider, ServerStats,
};
pub use dns::{CertIssuerConfig, DnsProvider, ExternalDnsConfig, MockDnsProvider};
pub use error::{ProviderError, ProviderResult};
pub use payments::{
    CheckoutSession, CheckoutStatus, MeterEvent, MockPaymentProvider, PaymentProvider,
};
pub use server::{
    MockServerProvider, Offering, OfferingPrice, Order, ProviderServer, ProviderServerStatus,
    ServerProvider, Transaction, TransactionStatus,
};
pub use talos::{
    InstallOptions, MockRescueShell, RescueShell, ServerCreds, TalosInstaller, TalosProvider,
};
