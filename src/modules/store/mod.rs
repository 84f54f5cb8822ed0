pub mod ini_store;

pub use ini_store::IniStore;
