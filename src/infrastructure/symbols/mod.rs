pub mod mapper;

pub use mapper::{SymbolMapper, asset_class, pip_size};
