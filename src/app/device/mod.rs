pub mod details;
pub mod monitor;
pub mod partitions;
pub mod scanner;

#[cfg(test)]
pub(crate) mod fake;
