//! Port traits defining external boundaries.
//!
//! Each trait represents a boundary between the synchronization engine and
//! something it does not own: time, the disk, identifier allocation, remote
//! trackers reached over HTTP, and the local bug database. Implementations
//! live in `src/adapters/` and `src/store/`.

pub mod bugs;
pub mod clock;
pub mod filesystem;
pub mod http;
pub mod id_gen;

pub use bugs::BugRepository;
pub use clock::Clock;
pub use filesystem::FileSystem;
pub use http::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse};
pub use id_gen::IdGenerator;
