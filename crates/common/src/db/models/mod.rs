//! SeaORM entity models
//!
//! Database entities for the deposition engine

pub mod bucket;
pub mod community;
pub mod deposit;
pub mod file_instance;
pub mod grant;
pub mod license;
pub mod oai_set;
pub mod object_version;
pub mod peer_review;
pub mod pid;
pub mod pid_log;
pub mod pid_relation;
pub mod recid_sequence;
pub mod record;
pub mod record_revision;
pub mod sip;
pub mod user;

pub use pid::{
    Entity as PidEntity,
    Model as Pid,
    ActiveModel as PidActiveModel,
    Column as PidColumn,
    PidStatus,
};

pub use pid_log::{
    Entity as PidLogEntity,
    Model as PidLog,
    ActiveModel as PidLogActiveModel,
    Column as PidLogColumn,
};

pub use pid_relation::{
    Entity as PidRelationEntity,
    Model as PidRelation,
    ActiveModel as PidRelationActiveModel,
    Column as PidRelationColumn,
    RELATION_VERSION,
};

pub use recid_sequence::{
    Entity as RecidSequenceEntity,
    ActiveModel as RecidSequenceActiveModel,
};

pub use deposit::{
    Entity as DepositEntity,
    Model as Deposit,
    ActiveModel as DepositActiveModel,
    Column as DepositColumn,
    DepositStatus,
};

pub use sip::{
    Entity as SipEntity,
    Model as Sip,
    ActiveModel as SipActiveModel,
    Column as SipColumn,
};

pub use record::{
    Entity as RecordEntity,
    Model as Record,
    ActiveModel as RecordActiveModel,
    Column as RecordColumn,
};

pub use record_revision::{
    Entity as RecordRevisionEntity,
    Model as RecordRevision,
    ActiveModel as RecordRevisionActiveModel,
    Column as RecordRevisionColumn,
};

pub use bucket::{
    Entity as BucketEntity,
    Model as Bucket,
    ActiveModel as BucketActiveModel,
    Column as BucketColumn,
};

pub use object_version::{
    Entity as ObjectVersionEntity,
    Model as ObjectVersion,
    ActiveModel as ObjectVersionActiveModel,
    Column as ObjectVersionColumn,
};

pub use file_instance::{
    Entity as FileInstanceEntity,
    Model as FileInstance,
    ActiveModel as FileInstanceActiveModel,
    Column as FileInstanceColumn,
};

pub use oai_set::{
    Entity as OaiSetEntity,
    Model as OaiSet,
    ActiveModel as OaiSetActiveModel,
    Column as OaiSetColumn,
};

pub use community::{
    Entity as CommunityEntity,
    Model as Community,
    ActiveModel as CommunityActiveModel,
    Column as CommunityColumn,
};

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use license::{
    Entity as LicenseEntity,
    Model as License,
    ActiveModel as LicenseActiveModel,
    Column as LicenseColumn,
};

pub use grant::{
    Entity as GrantEntity,
    Model as Grant,
    ActiveModel as GrantActiveModel,
    Column as GrantColumn,
};

pub use peer_review::{
    Entity as PeerReviewEntity,
    Model as PeerReview,
    ActiveModel as PeerReviewActiveModel,
    Column as PeerReviewColumn,
    ReviewStatus,
};
