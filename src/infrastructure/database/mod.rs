//! Database infrastructure
//!
//! SQLite database implementation using sqlx with:
//! - Repository pattern adapters
//! - Database migrations
//! - Connection pool management
//! - WAL mode configuration

pub mod campaign_repo;
pub mod change_repo;
pub mod connection;
pub mod errors;
pub mod journal_repo;
pub mod metric_repo;
pub mod posterior_repo;
pub mod utils;

pub use campaign_repo::CampaignRepositoryImpl;
pub use change_repo::ChangeLogRepositoryImpl;
pub use connection::DatabaseConnection;
pub use errors::DatabaseError;
pub use journal_repo::JournalRepositoryImpl;
pub use metric_repo::MetricRepositoryImpl;
pub use posterior_repo::PosteriorRepositoryImpl;
