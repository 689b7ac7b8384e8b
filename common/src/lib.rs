pub mod error;
pub mod services;
pub mod types;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;
