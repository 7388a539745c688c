pub mod gateway;
#[cfg(target_os = "linux")]
pub mod native_linux;
pub mod types;

pub use gateway::{PluginGateway, PluginVtable};
pub use types::*;
