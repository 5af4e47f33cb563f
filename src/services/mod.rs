pub mod coordinator;
pub mod ledger_audit;
