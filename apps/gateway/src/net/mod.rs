pub mod callback;
pub mod connection;
pub mod dispatch;
pub mod listener;
pub mod registry;
pub mod session;
