//! Mobile-money integration: gateway client and ledger reconciliation.

pub mod gateway;
pub mod reconcile;

pub use gateway::{DarajaGateway, GatewayStatus, MobileMoneyGateway, StkAck};
pub use reconcile::{PaymentIntent, PaymentReconciler, ReconcileOutcome, SweepReport};
