pub mod branch;
pub mod person;

pub use branch::{BranchInfo, BranchKey, BranchStatus};
pub use person::{CheckIn, Person, PersonField};
