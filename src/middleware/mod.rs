pub mod clockwork;
pub mod session;
pub mod timing;
