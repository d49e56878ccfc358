//! Deposition lifecycle transitions

use crate::db::models::DepositStatus;
use crate::errors::{AppError, Result};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Replace the draft metadata
    Save,
    /// Add, remove, rename or reorder files
    ChangeFiles,
    ReserveDoi,
    Publish,
    /// The publication workflow committed
    Complete,
    /// The publication workflow failed and was rolled back
    Fail,
    /// An operator parked a running workflow
    Halt,
    Edit,
    Discard,
    NewVersion,
    Delete,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Save => "save",
            Event::ChangeFiles => "change files",
            Event::ReserveDoi => "reserve a DOI",
            Event::Publish => "publish",
            Event::Complete => "complete",
            Event::Fail => "fail",
            Event::Halt => "halt",
            Event::Edit => "edit",
            Event::Discard => "discard",
            Event::NewVersion => "create a new version of",
            Event::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Status after `event`, or a precondition error.
///
/// `has_record` tells whether the deposition was published before, which
/// decides where a failed or halted workflow returns to.
pub fn next(status: DepositStatus, event: Event, has_record: bool) -> Result<DepositStatus> {
    use DepositStatus::*;

    let parked = if has_record { Edited } else { Draft };
    let to = match (status, event) {
        (Draft | Edited, Event::Save | Event::ChangeFiles) => Some(status),
        (Draft, Event::ReserveDoi) if !has_record => Some(Draft),
        (Draft | Edited, Event::Publish) => Some(InProgress),
        (InProgress, Event::Complete) => Some(Published),
        (InProgress, Event::Fail | Event::Halt) => Some(parked),
        (Published, Event::Edit) if has_record => Some(Edited),
        (Edited, Event::Discard) => Some(Published),
        (Published, Event::NewVersion) => Some(Published),
        (Draft, Event::Delete) if !has_record => Some(Draft),
        _ => None,
    };

    to.ok_or_else(|| {
        let message = format!("Cannot {} a deposition in state '{}'", event, status);
        match event {
            // Only published depositions have versions
            Event::NewVersion => AppError::Validation { message, field: None },
            _ => AppError::Precondition { message },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use DepositStatus::*;

    #[test]
    fn test_happy_path() {
        assert_eq!(next(Draft, Event::Save, false).unwrap(), Draft);
        assert_eq!(next(Draft, Event::Publish, false).unwrap(), InProgress);
        assert_eq!(next(InProgress, Event::Complete, false).unwrap(), Published);
        assert_eq!(next(Published, Event::Edit, true).unwrap(), Edited);
        assert_eq!(next(Edited, Event::Publish, true).unwrap(), InProgress);
        assert_eq!(next(Edited, Event::Discard, true).unwrap(), Published);
        assert_eq!(next(Published, Event::NewVersion, true).unwrap(), Published);
    }

    #[test]
    fn test_failures_park_the_deposition() {
        assert_eq!(next(InProgress, Event::Fail, false).unwrap(), Draft);
        assert_eq!(next(InProgress, Event::Fail, true).unwrap(), Edited);
        assert_eq!(next(InProgress, Event::Halt, false).unwrap(), Draft);
    }

    #[test]
    fn test_refused_transitions() {
        for (status, event, has_record) in [
            (Published, Event::Save, true),
            (Published, Event::Delete, true),
            (Published, Event::ChangeFiles, true),
            (Draft, Event::Edit, false),
            (InProgress, Event::Publish, false),
            (Edited, Event::ReserveDoi, true),
        ] {
            let err = next(status, event, has_record).unwrap_err();
            assert!(matches!(err, AppError::Precondition { .. }), "{:?} {:?}", status, event);
        }
    }

    #[test]
    fn test_new_version_requires_publication() {
        for (status, has_record) in [(Draft, false), (Edited, true), (InProgress, false)] {
            let err = next(status, Event::NewVersion, has_record).unwrap_err();
            assert_eq!(err.status_code().as_u16(), 400);
        }
        let err = next(Draft, Event::NewVersion, false).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation failed: Cannot create a new version of a deposition in state 'draft'"
        );
    }

    #[test]
    fn test_file_changes_follow_state() {
        assert_eq!(next(Draft, Event::ChangeFiles, false).unwrap(), Draft);
        assert_eq!(next(Edited, Event::ChangeFiles, true).unwrap(), Edited);
        assert!(next(InProgress, Event::ChangeFiles, false).is_err());
        assert!(next(Published, Event::ChangeFiles, true).is_err());
    }
}
