pub mod logger;
pub mod worker;
