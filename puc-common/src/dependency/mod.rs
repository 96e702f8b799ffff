pub mod definition;
pub mod filter;
pub mod requirement;

pub use definition::{TransactionType, UnitDescriptor};
pub use filter::Filter;
pub use requirement::{Constraint, Matcher, ProviderRequest, Requirement};
