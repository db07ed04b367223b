//! Integration test modules.

mod accrual_test;
mod command_bus_test;
mod mock_adapter;
mod orchestrator_test;
mod worker_test;
