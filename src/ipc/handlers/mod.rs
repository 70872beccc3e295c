pub mod attendance;
pub mod core;
pub mod profiles;
pub mod roster;
pub mod session;
pub mod sync;
