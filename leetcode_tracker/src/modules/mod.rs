pub mod contests;
pub mod handlers;
pub mod migration;
