pub mod pheromone_store;
pub mod query;
pub mod types;

pub use pheromone_store::{MaintainReport, PheromoneStore};
pub use types::{
    AnalysisSource, AuditAction, AuditEvent, FileKey, FileKind, Namespace, PatternDetail,
    QualityEntry, Status, StatusEntry, TaskEntry,
};
