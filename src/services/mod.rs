pub mod monitor;
pub mod results;
pub mod search;
pub mod similarity;
pub mod validation;
