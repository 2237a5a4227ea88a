pub mod audit;
pub mod chassis;
