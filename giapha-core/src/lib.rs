pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod ipc;
pub mod models;
pub mod relations;
pub mod seed;
pub mod slug;
pub mod store;

pub use config::GiaphaConfig;
pub use error::{GatewayError, GiaphaError, StoreError};
pub use gateway::{BatchOp, FieldPatch, InMemoryGateway, PartitionGateway, PgGateway, Subscription};
pub use models::{BranchInfo, BranchKey, BranchStatus, CheckIn, Person, PersonField};
pub use relations::{Relatives, Snapshot};
pub use seed::{SeedProvider, StaticSeedProvider};
pub use store::{ChildDraft, GraphStore, PeopleSet, StoreOptions};
