pub mod config;
pub mod events;
pub mod extensions;
pub mod host;
pub mod interop;
pub mod modules;
pub mod plugins;
pub mod services;

pub use host::HostContext;
pub use plugins::PluginManager;
