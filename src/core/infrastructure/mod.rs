pub mod api_client;
pub mod netbox_client;
pub mod worker_pool;
