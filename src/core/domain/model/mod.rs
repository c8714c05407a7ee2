pub mod guest_agent;
pub mod interface;
pub mod netbox;
pub mod node_list_item;
pub mod os_info;
pub mod reconciled;
pub mod storage;
pub mod vm;
