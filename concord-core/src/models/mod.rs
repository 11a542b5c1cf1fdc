pub mod analysis;
pub mod entity;
pub mod message;
pub mod session;

pub use analysis::{Intent, IntentAnalysis, ReferenceAnalysis, ReferenceType, SourceTarget};
pub use entity::{
    ConflictAction, Correction, CrossReference, DataQuality, Entity, EntityAttributes,
    EntityConflict, EntityProfile, EntityType,
};
pub use message::{Message, MessageMetadata, MessageRole, ProvenanceRef};
pub use session::{Session, SessionContext};
