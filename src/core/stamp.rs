//! Page-load stamp: appends `<p class="generated-at">Generated at …</p>` to the
//! mount point.

use super::document::{Document, DocumentError};
use crate::time::{format_timestamp, Clock};
use thiserror::Error;
use tracing::debug;

/// Id of the element the stamp is appended to
pub const MOUNT_POINT_ID: &str = "container";
/// Class label carried by the generated paragraph
pub const GENERATED_AT_CLASS: &str = "generated-at";
/// Text placed before the timestamp
pub const TEXT_PREFIX: &str = "Generated at ";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StampError {
    #[error("mount point '#{id}' not found")]
    MissingMountPoint { id: String },
    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// Build the stamp paragraph and append it to `#container`
///
/// On `MissingMountPoint` nothing has been attached to the document; the
/// unattached paragraph is simply dropped and the error is left to the
/// caller to surface. Returns the appended node.
pub fn stamp_generated_at<D, C>(doc: &mut D, clock: &C) -> Result<D::Node, StampError>
where
    D: Document,
    C: Clock + ?Sized,
{
    let p = doc.create_element("p")?;
    doc.set_class_name(&p, GENERATED_AT_CLASS)?;

    let timestamp = format_timestamp(&clock.now());
    doc.set_text_content(&p, &format!("{TEXT_PREFIX}{timestamp}"))?;

    let Some(mount) = doc.get_element_by_id(MOUNT_POINT_ID) else {
        return Err(StampError::MissingMountPoint {
            id: MOUNT_POINT_ID.to_string(),
        });
    };

    doc.append_child(&mount, &p)?;
    debug!(%timestamp, "Generated-at stamp appended");
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::document::MemoryDocument;
    use crate::time::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::io;
    use std::sync::{Arc, Mutex};

    fn at(h: u32, m: u32, s: u32) -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap())
    }

    #[test]
    fn test_scenario_container() {
        let mut doc = MemoryDocument::with_containers(&["container"]);
        stamp_generated_at(&mut doc, &at(10, 30, 0)).unwrap();

        assert_eq!(
            doc.to_html(),
            "<body><div id=\"container\">\
             <p class=\"generated-at\">Generated at 2024-01-15T10:30:00.000Z</p>\
             </div></body>"
        );
    }

    #[test]
    fn test_single_paragraph_inserted() {
        let mut doc = MemoryDocument::with_containers(&["other", "container"]);
        let before = doc.element_count();
        let p = stamp_generated_at(&mut doc, &at(8, 0, 0)).unwrap();

        let mount = doc.get_element_by_id(MOUNT_POINT_ID).unwrap();
        assert_eq!(doc.children(mount), vec![p]);
        assert_eq!(doc.tag(p), Some("p"));
        assert_eq!(doc.class_name(p), Some(GENERATED_AT_CLASS));
        assert_eq!(doc.element_count(), before + 1);

        let other = doc.get_element_by_id("other").unwrap();
        assert!(doc.children(other).is_empty());
    }

    #[test]
    fn test_appended_as_last_child() {
        let mut doc = MemoryDocument::with_containers(&["container"]);
        let mount = doc.get_element_by_id(MOUNT_POINT_ID).unwrap();
        let existing = doc.create_element("h1").unwrap();
        doc.append_child(&mount, &existing).unwrap();

        let p = stamp_generated_at(&mut doc, &at(8, 0, 0)).unwrap();
        assert_eq!(doc.children(mount), vec![existing, p]);
    }

    #[test]
    fn test_text_is_iso_timestamp() {
        let mut doc = MemoryDocument::with_containers(&["container"]);
        let p = stamp_generated_at(&mut doc, &crate::time::SystemClock).unwrap();

        let text = doc.text_content(p).unwrap();
        let stamp = text.strip_prefix(TEXT_PREFIX).unwrap();
        assert!(stamp.ends_with('Z'));
        assert_eq!(stamp.len(), "2024-01-15T10:30:00.000Z".len());
        assert!(DateTime::parse_from_rfc3339(stamp).is_ok());
    }

    #[test]
    fn test_structure_independent_of_clock() {
        let mut first = MemoryDocument::with_containers(&["container"]);
        let mut second = MemoryDocument::with_containers(&["container"]);
        let a = stamp_generated_at(&mut first, &at(10, 30, 0)).unwrap();
        let b = stamp_generated_at(&mut second, &at(10, 30, 1)).unwrap();

        assert_ne!(first.text_content(a), second.text_content(b));
        assert_eq!(first.tag(a), second.tag(b));
        assert_eq!(first.class_name(a), second.class_name(b));
        assert!(first.text_content(a).unwrap().starts_with(TEXT_PREFIX));
        assert!(second.text_content(b).unwrap().starts_with(TEXT_PREFIX));
    }

    #[test]
    fn test_missing_mount_point() {
        let mut doc = MemoryDocument::with_containers(&["main", "footer"]);
        let before = doc.to_html();

        let err = stamp_generated_at(&mut doc, &at(10, 30, 0)).unwrap_err();
        assert_eq!(
            err,
            StampError::MissingMountPoint {
                id: "container".to_string()
            }
        );
        assert_eq!(doc.to_html(), before);
        assert_eq!(err.to_string(), "mount point '#container' not found");
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn with_captured_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, captured.text())
    }

    #[test]
    fn test_missing_mount_point_is_not_logged() {
        let (result, logs) = with_captured_logs(|| {
            let mut doc = MemoryDocument::with_containers(&["main"]);
            stamp_generated_at(&mut doc, &at(10, 30, 0))
        });
        assert!(result.is_err());
        assert!(!logs.contains("ERROR"), "{logs}");

        let (result, logs) = with_captured_logs(|| {
            let mut doc = MemoryDocument::with_containers(&["container"]);
            stamp_generated_at(&mut doc, &at(10, 30, 0))
        });
        assert!(result.is_ok());
        assert!(logs.contains("Generated-at stamp appended"), "{logs}");
    }

    #[test]
    fn test_repeated_invocation_appends_again() {
        let mut doc = MemoryDocument::with_containers(&["container"]);
        stamp_generated_at(&mut doc, &at(10, 30, 0)).unwrap();
        stamp_generated_at(&mut doc, &at(10, 30, 5)).unwrap();

        let mount = doc.get_element_by_id(MOUNT_POINT_ID).unwrap();
        assert_eq!(doc.children(mount).len(), 2);
    }
}
