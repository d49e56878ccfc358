//! COAR Notify inbox for peer reviews
//!
//! Only `coar-notify:ReviewAction` notifications are stored. A stored review
//! is linked to the record whose DOI it cites and published straight away.

use crate::db::models::*;
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::records::RECORD_OBJECT_TYPE;
use crate::services::Services;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

pub const REVIEW_ACTION: &str = "coar-notify:ReviewAction";

#[derive(Debug, Clone, PartialEq)]
pub enum InboxOutcome {
    Stored(PeerReview),
    /// Not a review notification
    Ignored,
}

fn text<'a>(payload: &'a Value, pointer: &str) -> Result<&'a str> {
    payload
        .pointer(pointer)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::InvalidFormat {
            message: format!("Notification is missing {}", pointer.trim_start_matches('/').replace('/', ".")),
        })
}

/// Last `:` segment of the notification `id`
pub fn notification_id(payload: &Value) -> Result<String> {
    let id = text(payload, "/id")?;
    Ok(id.rsplit(':').next().unwrap_or(id).to_string())
}

/// DOI cited by the notification context, taken from the last two path segments
pub fn cited_doi(payload: &Value) -> Result<String> {
    let cite_as = text(payload, "/context/ietf:cite-as")?;
    let segments: Vec<&str> = cite_as.rsplitn(3, '/').take(2).collect();
    if segments.len() < 2 {
        return Err(AppError::InvalidFormat {
            message: format!("Cannot read a DOI from {}", cite_as),
        });
    }
    Ok(format!("{}/{}", segments[1], segments[0]))
}

fn is_review(payload: &Value) -> bool {
    payload
        .get("type")
        .and_then(|t| t.get(1))
        .and_then(Value::as_str)
        .is_some_and(|t| t == REVIEW_ACTION)
}

async fn resolve_record<C: ConnectionTrait>(services: &Services, db: &C, doi: &str) -> Result<Uuid> {
    services
        .pids
        .get(db, "doi", doi)
        .await?
        .filter(|pid| pid.object_type.as_deref() == Some(RECORD_OBJECT_TYPE))
        .and_then(|pid| pid.object_uuid)
        .ok_or_else(|| AppError::RecordNotFound { id: doi.to_string() })
}

/// Store a review notification and attach it to its record
#[instrument(skip(services, payload))]
pub async fn receive(services: &Services, payload: &Value) -> Result<InboxOutcome> {
    if !is_review(payload) {
        metrics::record_notification("ignored");
        return Ok(InboxOutcome::Ignored);
    }

    let notification_id = notification_id(payload)?;
    let db = services.db.write();

    let existing = PeerReviewEntity::find()
        .filter(PeerReviewColumn::NotificationId.eq(notification_id.as_str()))
        .one(db)
        .await?;
    if existing.is_some() {
        metrics::record_notification("duplicate");
        return Err(AppError::NotificationAlreadyReceived { notification_id });
    }

    let doi = cited_doi(payload)?;
    let record_id = resolve_record(services, db, &doi).await?;
    let doi_url = text(payload, "/object/ietf:cite-as")?;
    let origin = text(payload, "/origin/id")?;

    let txn = db.begin().await?;
    let now = Utc::now();
    let review = PeerReviewActiveModel {
        id: Set(Uuid::new_v4()),
        notification_id: Set(notification_id.clone()),
        doi_url: Set(doi_url.to_string()),
        origin: Set(origin.to_string()),
        status: Set(ReviewStatus::Received.into()),
        errors: Set(None),
        event_id: Set(None),
        record_id: Set(None),
        created: Set(now.into()),
        updated: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let mut active: PeerReviewActiveModel = review.into();
    active.record_id = Set(Some(record_id));
    active.status = Set(ReviewStatus::Published.into());
    active.updated = Set(Utc::now().into());
    let review = active.update(&txn).await?;
    txn.commit().await?;

    metrics::record_notification("stored");
    info!(notification_id = %notification_id, doi = %doi, record_id = %record_id, "Peer review stored");
    Ok(InboxOutcome::Stored(review))
}

/// Reviews attached to a record, oldest first
pub async fn for_record<C: ConnectionTrait>(db: &C, record_id: Uuid) -> Result<Vec<PeerReview>> {
    use sea_orm::QueryOrder;

    PeerReviewEntity::find()
        .filter(PeerReviewColumn::RecordId.eq(record_id))
        .order_by_asc(PeerReviewColumn::Created)
        .all(db)
        .await
        .map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pidstore::NewPid;
    use crate::records;
    use serde_json::json;

    fn payload(id: &str, doi: &str) -> Value {
        json!({
            "@context": ["https://www.w3.org/ns/activitystreams", "https://purl.org/coar/notify"],
            "id": format!("urn:uuid:{}", id),
            "type": ["Announce", "coar-notify:ReviewAction"],
            "origin": {"id": "https://review-service.example.org", "type": "Service"},
            "context": {"id": "https://zenodo.org/record/1", "ietf:cite-as": format!("https://doi.org/{}", doi)},
            "object": {"id": "https://review-service.example.org/review/1", "ietf:cite-as": "https://doi.org/10.9999/review.1"}
        })
    }

    async fn setup() -> (Services, Uuid) {
        let services = Services::in_memory().await.unwrap();
        let db = services.db.write();
        let record = records::create(db, Uuid::new_v4(), json!({"recid": 1, "doi": "10.5072/zenodo.1"}))
            .await
            .unwrap();
        services
            .pids
            .create(
                db,
                NewPid::new("doi", "10.5072/zenodo.1")
                    .status(PidStatus::Registered)
                    .object(RECORD_OBJECT_TYPE, record.id),
            )
            .await
            .unwrap();
        (services, record.id)
    }

    #[test]
    fn test_identifiers_from_payload() {
        let p = payload("0370c0fb-bb78-4a9b-87f5-bed307a509dd", "10.5072/zenodo.1");
        assert_eq!(notification_id(&p).unwrap(), "0370c0fb-bb78-4a9b-87f5-bed307a509dd");
        assert_eq!(cited_doi(&p).unwrap(), "10.5072/zenodo.1");
        assert!(cited_doi(&json!({"context": {"ietf:cite-as": "nope"}})).is_err());
    }

    #[tokio::test]
    async fn test_receive_review() {
        let (services, record_id) = setup().await;

        let outcome = receive(&services, &payload("abc", "10.5072/zenodo.1")).await.unwrap();
        let InboxOutcome::Stored(review) = outcome else {
            panic!("review not stored");
        };
        assert_eq!(review.notification_id, "abc");
        assert_eq!(review.record_id, Some(record_id));
        assert_eq!(review.review_status(), ReviewStatus::Published);
        assert_eq!(review.doi_url, "https://doi.org/10.9999/review.1");
        assert_eq!(review.origin, "https://review-service.example.org");

        let err = receive(&services, &payload("abc", "10.5072/zenodo.1")).await.unwrap_err();
        assert!(matches!(err, AppError::NotificationAlreadyReceived { .. }));
        assert_eq!(err.status_code().as_u16(), 409);

        assert_eq!(for_record(services.db.read(), record_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_record_and_other_types() {
        let (services, _) = setup().await;

        let err = receive(&services, &payload("def", "10.5072/zenodo.99")).await.unwrap_err();
        assert!(matches!(err, AppError::RecordNotFound { .. }));
        assert_eq!(err.status_code().as_u16(), 404);

        let mut endorsement = payload("ghi", "10.5072/zenodo.1");
        endorsement["type"] = json!(["Announce", "coar-notify:EndorsementAction"]);
        assert_eq!(receive(&services, &endorsement).await.unwrap(), InboxOutcome::Ignored);
        assert!(PeerReviewEntity::find().all(services.db.read()).await.unwrap().is_empty());
    }
}
