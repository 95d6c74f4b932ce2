// builders + curriculum runner + evaluation helpers
pub mod builders;
pub mod curriculum;
pub mod utils;

#[cfg(feature = "test-utils")]
pub mod test_utils;
