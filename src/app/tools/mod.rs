pub mod command_line;
pub mod commands;
pub mod locator;
pub mod parse;
pub mod process;
pub mod runner;
