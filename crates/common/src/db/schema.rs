//! Schema bootstrap
//!
//! Tables are derived from the entity definitions so that tests and fresh
//! installations share one source of truth. Creation order follows the
//! foreign keys declared by the entities.

use crate::db::models::*;
use crate::errors::Result;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectionTrait, EntityTrait, Schema};
use tracing::info;

/// Create every table and index if missing
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<()> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut tables = vec![
        schema.create_table_from_entity(UserEntity),
        schema.create_table_from_entity(CommunityEntity),
        schema.create_table_from_entity(BucketEntity),
        schema.create_table_from_entity(FileInstanceEntity),
        schema.create_table_from_entity(ObjectVersionEntity),
        schema.create_table_from_entity(PidEntity),
        schema.create_table_from_entity(PidLogEntity),
        schema.create_table_from_entity(PidRelationEntity),
        schema.create_table_from_entity(RecidSequenceEntity),
        schema.create_table_from_entity(DepositEntity),
        schema.create_table_from_entity(SipEntity),
        schema.create_table_from_entity(RecordEntity),
        schema.create_table_from_entity(RecordRevisionEntity),
        schema.create_table_from_entity(OaiSetEntity),
        schema.create_table_from_entity(LicenseEntity),
        schema.create_table_from_entity(GrantEntity),
        schema.create_table_from_entity(PeerReviewEntity),
    ];

    for table in tables.iter_mut() {
        table.if_not_exists();
        db.execute(backend.build(&*table)).await?;
    }

    // (pid_type, pid_value) is the identity of a persistent identifier
    let pid_identity = Index::create()
        .name("uidx_pidstore_pid_type_value")
        .table(PidEntity)
        .col(PidColumn::PidType)
        .col(PidColumn::PidValue)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&pid_identity)).await?;

    let pid_object = Index::create()
        .name("idx_pidstore_pid_object")
        .table(PidEntity)
        .col(PidColumn::ObjectType)
        .col(PidColumn::ObjectUuid)
        .if_not_exists()
        .to_owned();
    db.execute(backend.build(&pid_object)).await?;

    create_column_indexes(db, &schema, PidEntity).await?;
    create_column_indexes(db, &schema, ObjectVersionEntity).await?;
    create_column_indexes(db, &schema, FileInstanceEntity).await?;

    info!("Database schema ready");
    Ok(())
}

async fn create_column_indexes<C, E>(db: &C, schema: &Schema, entity: E) -> Result<()>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let backend = db.get_database_backend();
    for mut index in schema.create_index_from_entity(entity) {
        index.if_not_exists();
        db.execute(backend.build(&index)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use sea_orm::{ActiveModelTrait, Set};

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let pool = DbPool::in_memory().await.unwrap();
        create_schema(pool.write()).await.unwrap();
    }

    #[tokio::test]
    async fn test_pid_identity_is_unique() {
        let pool = DbPool::in_memory().await.unwrap();
        let now = chrono::Utc::now();

        let make = || PidActiveModel {
            pid_type: Set("doi".into()),
            pid_value: Set("10.5281/zenodo.1".into()),
            pid_provider: Set(None),
            status: Set(PidStatus::New.into()),
            object_type: Set(None),
            object_uuid: Set(None),
            created: Set(now.into()),
            updated: Set(now.into()),
            ..Default::default()
        };

        make().insert(pool.write()).await.unwrap();
        assert!(make().insert(pool.write()).await.is_err());
    }
}
