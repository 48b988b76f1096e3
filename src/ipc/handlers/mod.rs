pub mod attendance;
pub mod bulk;
pub mod core;
pub mod records;
pub mod students;
