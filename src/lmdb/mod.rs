pub mod actor;
pub mod messages;
pub mod gap_detector;
pub mod storage;


pub use actor::LmdbActor;
pub use messages::{LmdbActorMessage, LmdbActorResponse, LmdbActorTell};
pub use storage::LmdbStorage;
