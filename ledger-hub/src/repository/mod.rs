pub mod account_repository;
pub mod invoice_repository;
pub mod transaction_repository;
