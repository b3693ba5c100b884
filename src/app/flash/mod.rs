pub mod engine;
pub mod queue;

#[cfg(test)]
mod tests;
