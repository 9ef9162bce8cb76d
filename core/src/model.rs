use chrono::{DateTime, FixedOffset, TimeDelta};
use indexmap::IndexMap;
use serde::Serialize;

use crate::id::{ContentId, SourceId};

/// One entry of the server's default source list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceRecord {
    pub id: SourceId,
    pub display_name: String,
    /// Logical channel number, as the server formats it.
    pub channel_number: Option<String>,
    pub is_live: bool,
}

impl SourceRecord {
    /// Name shown in source pickers, prefixed with the channel number.
    pub fn label(&self) -> String {
        match &self.channel_number {
            Some(lcn) => format!("{lcn} -- {}", self.display_name),
            None => self.display_name.clone(),
        }
    }
}

/// Sources keyed by id, in the order the server listed them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceCatalog {
    sources: IndexMap<SourceId, SourceRecord>,
}

impl SourceCatalog {
    pub fn get(&self, id: &SourceId) -> Option<&SourceRecord> {
        self.sources.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceRecord> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn to_vec(&self) -> Vec<SourceRecord> {
        self.sources.values().cloned().collect()
    }
}

impl FromIterator<SourceRecord> for SourceCatalog {
    /// Later duplicates of an id replace the earlier record in place.
    fn from_iter<T: IntoIterator<Item = SourceRecord>>(iter: T) -> Self {
        Self {
            sources: iter
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        }
    }
}

/// What the device's output is presenting right now.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputState {
    /// `None` while the output presents nothing the server can name.
    pub source_id: Option<SourceId>,
    pub content_id: Option<ContentId>,
    /// Fraction in `[0, 1]`; absent when the output has no volume control.
    pub volume: Option<f32>,
    /// The output is showing an application rather than a programme.
    pub is_app: bool,
}

/// Metadata for the programme currently on the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgrammeInfo {
    /// Empty when the server knows nothing about the current content.
    pub title: String,
    pub start_time: Option<DateTime<FixedOffset>>,
    pub duration_seconds: Option<u32>,
    pub synopsis: Option<String>,
}

impl ProgrammeInfo {
    pub fn is_known(&self) -> bool {
        !self.title.is_empty()
    }

    pub fn end_time(&self) -> Option<DateTime<FixedOffset>> {
        let start = self.start_time?;
        let duration = TimeDelta::try_seconds(self.duration_seconds?.into())?;
        start.checked_add_signed(duration)
    }
}

/// One item of a source's content listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentEntry {
    pub content_id: ContentId,
    pub source_id: SourceId,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(sid: &str, name: &str, lcn: Option<&str>) -> SourceRecord {
        SourceRecord {
            id: SourceId::from_wire(sid),
            display_name: name.into(),
            channel_number: lcn.map(Into::into),
            is_live: true,
        }
    }

    #[test]
    fn test_catalog_preserves_server_order() {
        let catalog: SourceCatalog = [
            source("zeta", "Zeta", Some("001")),
            source("alpha", "Alpha", Some("002")),
            source("mid", "Mid", None),
        ]
        .into_iter()
        .collect();

        let names: Vec<_> = catalog.iter().map(|s| s.display_name.as_str()).collect();
        assert_eq!(names, ["Zeta", "Alpha", "Mid"]);
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_catalog_keys_are_unique() {
        let catalog: SourceCatalog = [source("a", "First", None), source("a", "Second", None)]
            .into_iter()
            .collect();

        assert_eq!(catalog.len(), 1);
        assert_eq!(
            catalog.get(&SourceId::from_wire("a")).unwrap().display_name,
            "Second"
        );
    }

    #[test]
    fn test_source_label() {
        assert_eq!(source("a", "BBC One", Some("001")).label(), "001 -- BBC One");
        assert_eq!(source("a", "iPlayer", None).label(), "iPlayer");
    }

    #[test]
    fn test_programme_end_time() {
        let programme = ProgrammeInfo {
            title: "News".into(),
            start_time: DateTime::parse_from_rfc3339("2011-05-01T18:00:00Z").ok(),
            duration_seconds: Some(1800),
            synopsis: None,
        };

        let end = programme.end_time().unwrap();
        assert_eq!(end.to_rfc3339(), "2011-05-01T18:30:00+00:00");
        assert!(ProgrammeInfo::default().end_time().is_none());
        assert!(!ProgrammeInfo::default().is_known());
    }
}
