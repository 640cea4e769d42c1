pub mod create;
pub mod proxy;
