pub mod query;
pub mod result;
pub mod subscription;

pub use query::{QueryType, SearchQuery};
pub use result::{FoundResult, MatchLevel, ResultKind};
pub use subscription::{Plan, Subscription, Tier};
