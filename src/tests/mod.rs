pub mod test_utils;

mod test_commands;
mod test_retries;
