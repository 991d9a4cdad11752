pub mod contact;
pub mod field;
pub mod flow;
pub mod flow_start;
pub mod group;
pub mod ids;
pub mod org;
pub mod recipients;
pub mod session;
pub mod urn;

// Re-export core models for easy access
pub use contact::{Contact, ContactIdSet, ContactStatus, UrnResolution};
pub use field::{ContactField, FieldType};
pub use flow::{FlowRef, FlowType};
pub use flow_start::{BatchCompletion, FlowStart, FlowStartBatch, NewFlowStart, StartType};
pub use group::Group;
pub use ids::{ContactId, FlowId, GroupId, OrgId, StartId, UserId};
pub use org::{DateFormat, OrgEnvironment};
pub use recipients::{Exclusions, RecipientSpec};
pub use session::{FlowSession, NewSession, SessionStatus};
pub use urn::{Urn, UrnError};
