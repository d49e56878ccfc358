//! Persistent identifier store
//!
//! Provides:
//! - Identifier lifecycle (create, reserve, register, update, delete)
//! - Object assignment with explicit overwrite
//! - Append-only PID log written on every state change
//! - Integer minting shared by deposition ids, recids and conceptrecids
//!
//! Status transitions follow NEW -> RESERVED -> REGISTERED -> DELETED, plus
//! NEW -> REGISTERED and the hard delete of NEW identifiers. Every operation
//! is generic over the connection so it can run inside a transaction.

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::providers::ProviderRegistry;
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, SqlErr,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Actions recorded in the PID log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidAction {
    Create,
    Reserve,
    Register,
    Assign,
    Unassign,
    Update,
    Delete,
}

impl PidAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PidAction::Create => "CREATE",
            PidAction::Reserve => "RESERVE",
            PidAction::Register => "REGISTER",
            PidAction::Assign => "ASSIGN",
            PidAction::Unassign => "UNASSIGN",
            PidAction::Update => "UPDATE",
            PidAction::Delete => "DELETE",
        }
    }
}

/// Parameters of a new identifier
#[derive(Debug, Clone)]
pub struct NewPid {
    pub pid_type: String,
    pub pid_value: String,
    /// Adapter name; resolved from the registry when unset
    pub provider: Option<String>,
    pub status: PidStatus,
    pub object: Option<(String, Uuid)>,
}

impl NewPid {
    pub fn new(pid_type: impl Into<String>, pid_value: impl Into<String>) -> Self {
        Self {
            pid_type: pid_type.into(),
            pid_value: pid_value.into(),
            provider: None,
            status: PidStatus::New,
            object: None,
        }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn status(mut self, status: PidStatus) -> Self {
        self.status = status;
        self
    }

    pub fn object(mut self, object_type: impl Into<String>, object_uuid: Uuid) -> Self {
        self.object = Some((object_type.into(), object_uuid));
        self
    }
}

/// Identifier store backed by the database and the registrar adapters
#[derive(Clone)]
pub struct PidStore {
    providers: Arc<ProviderRegistry>,
}

impl PidStore {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self {
            providers: Arc::new(providers),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    // ========================================================================
    // Minting
    // ========================================================================

    /// Next integer from the shared sequence
    pub async fn next_recid<C: ConnectionTrait>(&self, db: &C) -> Result<i32> {
        let row = RecidSequenceActiveModel {
            created: Set(Utc::now().into()),
            ..Default::default()
        }
        .insert(db)
        .await?;

        Ok(row.id)
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Get an identifier; never mutates
    pub async fn get<C: ConnectionTrait>(&self, db: &C, pid_type: &str, pid_value: &str) -> Result<Option<Pid>> {
        PidEntity::find()
            .filter(PidColumn::PidType.eq(pid_type))
            .filter(PidColumn::PidValue.eq(pid_value))
            .one(db)
            .await
            .map_err(Into::into)
    }

    /// Get an identifier or fail with `PidNotFound`
    pub async fn get_required<C: ConnectionTrait>(&self, db: &C, pid_type: &str, pid_value: &str) -> Result<Pid> {
        self.get(db, pid_type, pid_value)
            .await?
            .ok_or_else(|| AppError::PidNotFound {
                pid_type: pid_type.to_string(),
                pid_value: pid_value.to_string(),
            })
    }

    pub async fn get_by_id<C: ConnectionTrait>(&self, db: &C, id: i32) -> Result<Option<Pid>> {
        PidEntity::find_by_id(id).one(db).await.map_err(Into::into)
    }

    /// Identifier of the given scheme assigned to an object
    pub async fn get_assigned<C: ConnectionTrait>(
        &self,
        db: &C,
        pid_type: &str,
        object_type: &str,
        object_uuid: Uuid,
    ) -> Result<Option<Pid>> {
        PidEntity::find()
            .filter(PidColumn::PidType.eq(pid_type))
            .filter(PidColumn::ObjectType.eq(object_type))
            .filter(PidColumn::ObjectUuid.eq(object_uuid))
            .filter(PidColumn::Status.ne(PidStatus::Deleted.as_code()))
            .order_by_asc(PidColumn::Id)
            .one(db)
            .await
            .map_err(Into::into)
    }

    /// History of an identifier, oldest first
    pub async fn logs<C: ConnectionTrait>(&self, db: &C, pid: &Pid) -> Result<Vec<PidLog>> {
        PidLogEntity::find()
            .filter(PidLogColumn::IdPid.eq(pid.id))
            .order_by_asc(PidLogColumn::Id)
            .all(db)
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create an identifier; fails with `PidAlreadyExists` on a duplicate
    pub async fn create<C: ConnectionTrait>(&self, db: &C, new: NewPid) -> Result<Pid> {
        let label = format!("{}:{}", new.pid_type, new.pid_value);

        if self.get(db, &new.pid_type, &new.pid_value).await?.is_some() {
            self.log(db, None, PidAction::Create, &label, "Failed to create. Already exists.")
                .await?;
            return Err(already_exists(&new));
        }

        let provider = new.provider.clone().or_else(|| {
            self.providers
                .resolve(&new.pid_type, &new.pid_value)
                .map(|p| p.name().to_string())
        });

        let now = Utc::now();
        let (object_type, object_uuid) = match new.object.clone() {
            Some((t, u)) => (Some(t), Some(u)),
            None => (None, None),
        };

        let inserted = PidActiveModel {
            pid_type: Set(new.pid_type.clone()),
            pid_value: Set(new.pid_value.clone()),
            pid_provider: Set(provider),
            status: Set(new.status.into()),
            object_type: Set(object_type),
            object_uuid: Set(object_uuid),
            created: Set(now.into()),
            updated: Set(now.into()),
            ..Default::default()
        }
        .insert(db)
        .await;

        // A concurrent insert can still win the race on the unique index
        let pid = match inserted {
            Ok(pid) => pid,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                return Err(already_exists(&new));
            }
            Err(e) => return Err(e.into()),
        };

        self.log(db, Some(pid.id), PidAction::Create, &label, "Created PID").await?;

        if let Some((object_type, object_uuid)) = &new.object {
            let message = format!("Assigned object {}:{}", object_type, object_uuid);
            self.log(db, Some(pid.id), PidAction::Assign, &label, &message).await?;
        }

        metrics::record_pid_operation("create", &pid.pid_type, true);
        Ok(pid)
    }

    /// Reserve an identifier with the registrar; idempotent for RESERVED
    pub async fn reserve<C: ConnectionTrait>(&self, db: &C, pid: &Pid, doc: Option<&str>) -> Result<bool> {
        if !(pid.is_new() || pid.is_reserved()) {
            return Err(already_registered(pid));
        }

        if let Some(provider) = self.providers.for_pid(pid) {
            if !self.call(pid, "reserve", provider.reserve(pid, doc)).await? {
                return Ok(false);
            }
        }

        self.set_status(db, pid, PidStatus::Reserved).await?;
        self.log(db, Some(pid.id), PidAction::Reserve, &pid.label(), "Successfully reserved PID")
            .await?;
        Ok(true)
    }

    /// Register an identifier with the registrar
    pub async fn register<C: ConnectionTrait>(&self, db: &C, pid: &Pid, url: &str, doc: Option<&str>) -> Result<bool> {
        if !(pid.is_new() || pid.is_reserved()) {
            return Err(already_registered(pid));
        }

        if let Some(provider) = self.providers.for_pid(pid) {
            if !self.call(pid, "register", provider.register(pid, url, doc)).await? {
                return Ok(false);
            }
        }

        self.set_status(db, pid, PidStatus::Registered).await?;
        self.log(db, Some(pid.id), PidAction::Register, &pid.label(), "Successfully registered PID")
            .await?;
        Ok(true)
    }

    /// Push new metadata or target URL for a registered identifier.
    ///
    /// With `with_deleted` a DELETED identifier is reactivated on success.
    pub async fn update<C: ConnectionTrait>(
        &self,
        db: &C,
        pid: &Pid,
        url: Option<&str>,
        doc: Option<&str>,
        with_deleted: bool,
    ) -> Result<bool> {
        if !(pid.is_registered() || (with_deleted && pid.is_deleted())) {
            return Err(AppError::Precondition {
                message: format!("PID {} is not registered ({})", pid.label(), pid.pid_status()),
            });
        }

        if let Some(provider) = self.providers.for_pid(pid) {
            if !self.call(pid, "update", provider.update(pid, url, doc)).await? {
                return Ok(false);
            }
        }

        if pid.is_deleted() {
            self.set_status(db, pid, PidStatus::Registered).await?;
            self.log(db, Some(pid.id), PidAction::Update, &pid.label(), "Reactivate").await?;
        } else {
            self.touch(db, pid).await?;
            self.log(db, Some(pid.id), PidAction::Update, &pid.label(), "Successfully updated PID")
                .await?;
        }
        Ok(true)
    }

    /// Delete an identifier.
    ///
    /// A NEW identifier is removed (its log survives with `id_pid` nulled) so
    /// the value can be created again; anything else goes through the
    /// registrar and ends in DELETED.
    pub async fn delete<C: ConnectionTrait>(&self, db: &C, pid: &Pid) -> Result<bool> {
        if pid.is_new() {
            PidLogEntity::update_many()
                .col_expr(PidLogColumn::IdPid, Expr::value(Option::<i32>::None))
                .filter(PidLogColumn::IdPid.eq(pid.id))
                .exec(db)
                .await?;
            PidEntity::delete_by_id(pid.id).exec(db).await?;

            self.log(db, None, PidAction::Delete, &pid.label(), "Unregistered PID successfully deleted")
                .await?;
            metrics::record_pid_operation("delete", &pid.pid_type, true);
            return Ok(true);
        }

        if let Some(provider) = self.providers.for_pid(pid) {
            if !self.call(pid, "delete", provider.delete(pid)).await? {
                return Ok(false);
            }
        }

        self.set_status(db, pid, PidStatus::Deleted).await?;
        self.log(db, Some(pid.id), PidAction::Delete, &pid.label(), "Successfully deleted PID")
            .await?;
        Ok(true)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    /// Assign an object; an existing different assignment needs `overwrite`
    pub async fn assign<C: ConnectionTrait>(
        &self,
        db: &C,
        pid: &Pid,
        object_type: &str,
        object_uuid: Uuid,
        overwrite: bool,
    ) -> Result<bool> {
        if pid.is_deleted() {
            return Err(AppError::Precondition {
                message: format!("Cannot assign an object to deleted PID {}", pid.label()),
            });
        }

        if pid.object_type.as_deref() == Some(object_type) && pid.object_uuid == Some(object_uuid) {
            return Ok(true);
        }

        if pid.has_object() {
            if !overwrite {
                return Err(AppError::PidAlreadyAssigned {
                    pid_type: pid.pid_type.clone(),
                    pid_value: pid.pid_value.clone(),
                });
            }
            let message = format!(
                "Unassigned object {}:{} (overwrite requested)",
                pid.object_type.as_deref().unwrap_or_default(),
                pid.object_uuid.map(|u| u.to_string()).unwrap_or_default()
            );
            self.log(db, Some(pid.id), PidAction::Unassign, &pid.label(), &message)
                .await?;
        }

        let mut active: PidActiveModel = pid.clone().into();
        active.object_type = Set(Some(object_type.to_string()));
        active.object_uuid = Set(Some(object_uuid));
        active.updated = Set(Utc::now().into());
        active.update(db).await?;

        let message = format!("Assigned object {}:{}", object_type, object_uuid);
        self.log(db, Some(pid.id), PidAction::Assign, &pid.label(), &message).await?;
        Ok(true)
    }

    /// Remove the object assignment
    pub async fn unassign<C: ConnectionTrait>(&self, db: &C, pid: &Pid) -> Result<bool> {
        if !pid.has_object() {
            return Ok(true);
        }

        let message = format!(
            "Unassigned object {}:{}",
            pid.object_type.as_deref().unwrap_or_default(),
            pid.object_uuid.map(|u| u.to_string()).unwrap_or_default()
        );

        let mut active: PidActiveModel = pid.clone().into();
        active.object_type = Set(None);
        active.object_uuid = Set(None);
        active.updated = Set(Utc::now().into());
        active.update(db).await?;

        self.log(db, Some(pid.id), PidAction::Unassign, &pid.label(), &message).await?;
        Ok(true)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Run a registrar call: `Ok(false)` is a soft failure, `Err` a hard one
    async fn call<F>(&self, pid: &Pid, action: &str, fut: F) -> Result<bool>
    where
        F: std::future::Future<Output = Result<bool>>,
    {
        match fut.await {
            Ok(true) => {
                metrics::record_pid_operation(action, &pid.pid_type, true);
                Ok(true)
            }
            Ok(false) => {
                warn!(pid = %pid.label(), action, "Registrar refused the operation");
                metrics::record_pid_operation(action, &pid.pid_type, false);
                Ok(false)
            }
            Err(e) => {
                error!(pid = %pid.label(), action, error = %e, "Failed to {} PID", action);
                metrics::record_pid_operation(action, &pid.pid_type, false);
                match e {
                    AppError::Provider { .. } => Err(e),
                    other => Err(AppError::Provider {
                        provider: pid.pid_provider.clone().unwrap_or_default(),
                        message: other.to_string(),
                    }),
                }
            }
        }
    }

    async fn set_status<C: ConnectionTrait>(&self, db: &C, pid: &Pid, status: PidStatus) -> Result<Pid> {
        let mut active: PidActiveModel = pid.clone().into();
        active.status = Set(status.into());
        active.updated = Set(Utc::now().into());
        active.update(db).await.map_err(Into::into)
    }

    async fn touch<C: ConnectionTrait>(&self, db: &C, pid: &Pid) -> Result<()> {
        let mut active: PidActiveModel = pid.clone().into();
        active.updated = Set(Utc::now().into());
        active.update(db).await?;
        Ok(())
    }

    async fn log<C: ConnectionTrait>(
        &self,
        db: &C,
        id_pid: Option<i32>,
        action: PidAction,
        label: &str,
        message: &str,
    ) -> Result<()> {
        info!("[{}] {}", label, message);

        PidLogActiveModel {
            id_pid: Set(id_pid),
            timestamp: Set(Utc::now().into()),
            action: Set(action.as_str().to_string()),
            message: Set(message.to_string()),
            ..Default::default()
        }
        .insert(db)
        .await?;
        Ok(())
    }
}

fn already_exists(new: &NewPid) -> AppError {
    AppError::PidAlreadyExists {
        pid_type: new.pid_type.clone(),
        pid_value: new.pid_value.clone(),
    }
}

fn already_registered(pid: &Pid) -> AppError {
    AppError::PidAlreadyRegistered {
        pid_type: pid.pid_type.clone(),
        pid_value: pid.pid_value.clone(),
    }
}
