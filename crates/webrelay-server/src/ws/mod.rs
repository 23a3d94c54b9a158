pub mod control;
pub mod handler;

pub use control::WsControl;
