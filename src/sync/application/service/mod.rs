pub mod fact_collector_service;
pub mod guest_command_service;
pub mod sync_service;
pub mod upsert_service;
