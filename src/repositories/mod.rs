pub mod payment_repository;

pub use payment_repository::{
    NewPayment, PaymentFilter, PaymentRepository, StatusBreakdown, StorePaymentStats,
};
