use std::collections::HashMap;

use crate::{
    classify::BatchIds,
    document::{AttributeValue, DocumentId},
    error::{Error, Result},
    session::{PrivilegedSession, TransactionControl, in_transaction},
};

/// Attribute names the touch phase writes.
#[derive(Debug, Clone, Copy)]
pub struct TouchAttributes<'a> {
    /// Text attribute round-tripped to force change detection.
    pub change_trigger: &'a str,
    /// Attribute stamped with the document id to request extraction.
    pub job_marker: &'a str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TouchReport {
    /// Documents whose change trigger was round-tripped.
    pub touched: usize,
    /// Documents stamped with the pending-job marker.
    pub marked: usize,
    /// Documents without a change trigger attribute.
    pub skipped: usize,
}

/// Mark and touch every document of a batch in one transaction.
///
/// Nothing persists unless both saves succeed and the commit goes through.
pub fn run_touch_phase(
    session: &dyn PrivilegedSession,
    txn: &dyn TransactionControl,
    batch: &BatchIds,
    attrs: TouchAttributes<'_>,
) -> Result<TouchReport> {
    in_transaction(txn, "touch", || touch_documents(session, batch, attrs))
}

fn touch_documents(
    session: &dyn PrivilegedSession,
    batch: &BatchIds,
    attrs: TouchAttributes<'_>,
) -> Result<TouchReport> {
    session.prefetch(&batch.ids)?;

    let mut report = TouchReport::default();
    let mut originals: HashMap<&DocumentId, AttributeValue> =
        HashMap::with_capacity(batch.ids.len());

    for id in &batch.ids {
        if batch.is_indexable(id) {
            session.set_attribute(
                id,
                attrs.job_marker,
                AttributeValue::text(id.as_str()),
            )?;
            report.marked += 1;
        }

        let original = match session.get_attribute(id, attrs.change_trigger) {
            Ok(value) => value,
            Err(Error::AttributeNotPresent { .. }) => {
                report.skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        session.set_attribute(id, attrs.change_trigger, original.touched()?)?;
        originals.insert(id, original);
    }
    session.save()?;

    // Second transition: back to the exact original value.
    for id in &batch.ids {
        if let Some(original) = originals.remove(id) {
            session.set_attribute(id, attrs.change_trigger, original)?;
            report.touched += 1;
        }
    }
    session.save()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        document::StoredDocument,
        testing::{MARKER, MemoryRepository, Op, TITLE},
    };

    fn attrs() -> TouchAttributes<'static> {
        TouchAttributes {
            change_trigger: TITLE,
            job_marker: MARKER,
        }
    }

    fn repo() -> MemoryRepository {
        let repo = MemoryRepository::default();
        repo.insert("a", StoredDocument::new("File").with_attribute(
            TITLE,
            AttributeValue::text("Alpha"),
        ));
        repo.insert("b", StoredDocument::new("Folder").with_attribute(
            TITLE,
            AttributeValue::text("Beta"),
        ));
        repo.insert("c", StoredDocument::new("Blob"));
        repo.insert("d", StoredDocument::new("File").with_attribute(
            TITLE,
            AttributeValue::Null,
        ));
        repo
    }

    fn ids(indexable: &[&str]) -> BatchIds {
        BatchIds {
            ids: ["a", "b", "c", "d"].map(DocumentId::from).to_vec(),
            indexable: indexable.iter().map(|&id| id.into()).collect(),
        }
    }

    #[test]
    fn content_is_unchanged_and_markers_are_stamped() {
        let repo = repo();
        let report =
            run_touch_phase(&repo, &repo, &ids(&["a", "c"]), attrs()).unwrap();

        assert_eq!(
            report,
            TouchReport {
                touched: 3,
                marked: 2,
                skipped: 1,
            }
        );
        assert_eq!(repo.attribute("a", TITLE), Some(AttributeValue::text("Alpha")));
        assert_eq!(repo.attribute("b", TITLE), Some(AttributeValue::text("Beta")));
        assert_eq!(repo.attribute("c", TITLE), None);
        assert_eq!(repo.attribute("d", TITLE), Some(AttributeValue::Null));

        assert_eq!(repo.attribute("a", MARKER), Some(AttributeValue::text("a")));
        assert_eq!(repo.attribute("c", MARKER), Some(AttributeValue::text("c")));
        assert_eq!(repo.attribute("b", MARKER), None);
        assert_eq!(repo.attribute("d", MARKER), None);
    }

    #[test]
    fn each_trigger_transitions_twice_across_two_saves() {
        let repo = repo();
        run_touch_phase(&repo, &repo, &ids(&[]), attrs()).unwrap();

        let ops = repo.ops();
        let saves: Vec<_> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| matches!(op, Op::Save))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(saves.len(), 2);

        let first_save = saves[0];
        assert!(ops[..first_save].contains(&Op::Set {
            id: "a".into(),
            name: TITLE.into(),
            value: AttributeValue::text("Alpha "),
        }));
        assert!(ops[first_save..saves[1]].contains(&Op::Set {
            id: "a".into(),
            name: TITLE.into(),
            value: AttributeValue::text("Alpha"),
        }));
        assert!(ops.contains(&Op::Prefetch(4)));
        assert_eq!(repo.commits(), 1);
    }

    #[test]
    fn failure_rolls_back_every_write() {
        let repo = repo();
        repo.fail_set_on("d");
        let err =
            run_touch_phase(&repo, &repo, &ids(&["a", "d"]), attrs()).unwrap_err();

        assert!(matches!(err, Error::Session(_)));
        assert_eq!(repo.rollbacks(), 1);
        assert_eq!(repo.commits(), 0);
        assert_eq!(repo.attribute("a", MARKER), None);
        assert_eq!(repo.attribute("a", TITLE), Some(AttributeValue::text("Alpha")));
    }

    #[test]
    fn non_text_trigger_fails_the_phase() {
        let repo = repo();
        repo.insert("b", StoredDocument::new("Folder").with_attribute(
            TITLE,
            AttributeValue::Integer(5),
        ));
        assert!(run_touch_phase(&repo, &repo, &ids(&[]), attrs()).is_err());
        assert_eq!(repo.rollbacks(), 1);
        assert_eq!(repo.attribute("a", TITLE), Some(AttributeValue::text("Alpha")));
    }
}
