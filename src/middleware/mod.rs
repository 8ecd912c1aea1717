pub mod auth;
pub mod timing;
