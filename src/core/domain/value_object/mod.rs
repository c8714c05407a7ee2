mod interface_blacklist;
pub(crate) mod serde_helpers;

pub use interface_blacklist::{DEFAULT_INTERFACE_BLACKLIST, InterfaceBlacklist};
