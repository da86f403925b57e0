pub mod annotations;
pub mod config;
pub mod error;
pub mod policy;
pub mod tools;

#[cfg(test)]
pub mod test_utils;
