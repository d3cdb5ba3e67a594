pub mod database;
pub mod redis;
pub mod storage;

#[cfg(test)]
pub mod memory;
