//! XML documents exchanged with a control server.
//!
//! Every response is wrapped in `<response resource="...">`; the structs here
//! mirror that shape and convert into the model types.

use chrono::DateTime;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    id::{ContentId, SourceId},
    model::{ContentEntry, OutputState, ProgrammeInfo, SourceCatalog, SourceRecord},
};

pub use quick_xml::{DeError, SeError};

/// Resources a client needs for full functionality.
pub const REQUIRED_RESOURCES: [&str; 4] = ["uc/events", "uc/sources", "uc/source-lists", "uc/outputs"];

pub fn from_str<T: DeserializeOwned>(xml: &str) -> Result<T, DeError> {
    quick_xml::de::from_str(xml)
}

#[derive(Debug, Deserialize)]
#[serde(rename = "response")]
pub struct ServerDocument {
    #[serde(default, rename = "@resource")]
    pub resource: String,
    pub ucserver: UcServer,
}

#[derive(Debug, Deserialize)]
pub struct UcServer {
    #[serde(default, rename = "@name")]
    pub name: Option<String>,
    #[serde(rename = "@version")]
    pub version: String,
    #[serde(default, rename = "@security-scheme")]
    pub security_scheme: bool,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceRef>,
}

impl UcServer {
    pub fn has_resource(&self, rref: &str) -> bool {
        self.resources.iter().any(|resource| resource.rref == rref)
    }

    /// Required resources the server does not advertise.
    pub fn missing_resources(&self) -> Vec<&'static str> {
        REQUIRED_RESOURCES
            .into_iter()
            .filter(|rref| !self.has_resource(rref))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceRef {
    #[serde(rename = "@rref")]
    pub rref: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "response")]
pub struct SourcesDocument {
    #[serde(default, rename = "@resource")]
    pub resource: String,
    #[serde(default)]
    pub sources: SourceList,
}

#[derive(Debug, Default, Deserialize)]
pub struct SourceList {
    #[serde(default, rename = "source")]
    pub items: Vec<SourceElement>,
}

#[derive(Debug, Deserialize)]
pub struct SourceElement {
    #[serde(rename = "@sid")]
    pub sid: String,
    #[serde(default, rename = "@name")]
    pub name: String,
    #[serde(default, rename = "@lcn")]
    pub lcn: Option<String>,
    #[serde(default, rename = "@live")]
    pub live: bool,
}

impl SourcesDocument {
    pub fn into_catalog(self) -> SourceCatalog {
        self.sources
            .items
            .into_iter()
            .map(|source| SourceRecord {
                id: SourceId::from_wire(&source.sid),
                display_name: source.name,
                channel_number: source.lcn,
                is_live: source.live,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "response")]
pub struct OutputDocument {
    #[serde(rename = "@resource")]
    pub resource: String,
    pub output: OutputElement,
}

#[derive(Debug, Deserialize)]
pub struct OutputElement {
    #[serde(default, rename = "@name")]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Option<SettingsElement>,
    #[serde(default)]
    pub programme: Option<Presentation>,
    #[serde(default)]
    pub app: Option<Presentation>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsElement {
    #[serde(default, rename = "@volume")]
    pub volume: Option<f32>,
}

/// `<programme>` or `<app>`: either names what the output presents.
#[derive(Debug, Deserialize)]
pub struct Presentation {
    #[serde(default, rename = "@sid")]
    pub sid: Option<String>,
    #[serde(default, rename = "@cid")]
    pub cid: Option<String>,
}

impl OutputDocument {
    /// The output's resource reference with any query string removed.
    pub fn resource_ref(&self) -> &str {
        let resource = self.resource.trim_start_matches('/');
        resource.split_once('?').map_or(resource, |(path, _)| path)
    }

    pub fn to_output_state(&self) -> OutputState {
        let output = &self.output;
        let (presentation, is_app) = match (&output.programme, &output.app) {
            (Some(programme), _) => (Some(programme), false),
            (None, Some(app)) => (Some(app), true),
            (None, None) => (None, false),
        };

        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        OutputState {
            source_id: presentation
                .and_then(|p| non_empty(&p.sid))
                .map(SourceId::from_wire),
            content_id: presentation
                .and_then(|p| non_empty(&p.cid))
                .map(ContentId::from_wire),
            volume: output
                .settings
                .as_ref()
                .and_then(|settings| settings.volume)
                .filter(|volume| volume.is_finite())
                .map(|volume| volume.clamp(0.0, 1.0)),
            is_app,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename = "response")]
pub struct SearchDocument {
    #[serde(default, rename = "@resource")]
    pub resource: String,
    #[serde(default, rename = "results")]
    pub results: Vec<Results>,
}

#[derive(Debug, Deserialize)]
pub struct Results {
    #[serde(default = "default_more", rename = "@more")]
    pub more: bool,
    #[serde(default, rename = "content")]
    pub content: Vec<ContentElement>,
}

fn default_more() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct ContentElement {
    #[serde(default, rename = "@cid")]
    pub cid: Option<String>,
    #[serde(default, rename = "@title")]
    pub title: Option<String>,
    #[serde(default, rename = "@start")]
    pub start: Option<String>,
    #[serde(default, rename = "@duration")]
    pub duration: Option<f64>,
    #[serde(default)]
    pub synopsis: Option<String>,
}

/// A page of a source listing, positioned relative to the requested offset.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    pub more: bool,
    /// Number of `<content>` elements returned, including unusable ones.
    pub len: usize,
    pub entries: Vec<(usize, ContentEntry)>,
}

impl SearchDocument {
    /// Parse a search response. The server answers an empty search with no
    /// body at all.
    pub fn parse(body: &str) -> Result<Self, DeError> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        from_str(body)
    }

    pub fn into_programme(self) -> ProgrammeInfo {
        let Some(content) = self
            .results
            .into_iter()
            .flat_map(|results| results.content)
            .next()
        else {
            return ProgrammeInfo::default();
        };

        ProgrammeInfo {
            title: content.title.unwrap_or_default(),
            start_time: content
                .start
                .as_deref()
                .and_then(|start| DateTime::parse_from_rfc3339(start).ok()),
            duration_seconds: content
                .duration
                .filter(|duration| duration.is_finite() && *duration >= 0.0)
                .map(|duration| duration.round().min(f64::from(u32::MAX)) as u32),
            synopsis: content.synopsis.filter(|synopsis| !synopsis.is_empty()),
        }
    }

    pub fn into_listing(self, source: &SourceId) -> ListingPage {
        let Some(results) = self.results.into_iter().next() else {
            return ListingPage {
                more: false,
                len: 0,
                entries: Vec::new(),
            };
        };

        let len = results.content.len();
        let entries = results
            .content
            .into_iter()
            .enumerate()
            .filter_map(|(index, content)| {
                let cid = content.cid.filter(|cid| !cid.is_empty())?;
                Some((
                    index,
                    ContentEntry {
                        content_id: ContentId::from_wire(&cid),
                        source_id: source.clone(),
                        title: content.title.unwrap_or_default(),
                    },
                ))
            })
            .collect();

        ListingPage {
            more: results.more,
            len,
            entries,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "response")]
pub struct EventsDocument {
    #[serde(default, rename = "@resource")]
    pub resource: String,
    pub events: EventsElement,
}

#[derive(Debug, Deserialize)]
pub struct EventsElement {
    #[serde(rename = "@notification-id")]
    pub notification_id: String,
    #[serde(default, rename = "resource")]
    pub resources: Vec<ResourceRef>,
}

impl EventsElement {
    pub fn names(&self, rref: &str) -> bool {
        let rref = rref.trim_start_matches('/');
        self.resources
            .iter()
            .any(|resource| resource.rref.trim_start_matches('/') == rref)
    }
}

/// Body of `PUT {output}/settings`.
#[derive(Debug, Serialize)]
#[serde(rename = "response")]
pub struct SettingsUpdate<'a> {
    #[serde(rename = "@resource")]
    pub resource: &'a str,
    pub settings: VolumeSetting,
}

#[derive(Debug, Serialize)]
pub struct VolumeSetting {
    #[serde(rename = "@volume")]
    pub volume: f32,
}

impl<'a> SettingsUpdate<'a> {
    pub fn volume(resource: &'a str, volume: f32) -> Self {
        Self {
            resource,
            settings: VolumeSetting { volume },
        }
    }

    pub fn to_xml(&self) -> Result<String, SeError> {
        quick_xml::se::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_document() {
        let xml = r#"<response resource="uc"><ucserver name="UC Server" security-scheme="false" server-id="00000000-0000-0000-0000-000000000000" version="0.6.0"><resource rref="uc/power"/><resource rref="uc/events"/><resource rref="uc/outputs"/></ucserver></response>"#;

        let doc: ServerDocument = from_str(xml).unwrap();
        assert_eq!(doc.resource, "uc");
        assert_eq!(doc.ucserver.version, "0.6.0");
        assert!(!doc.ucserver.security_scheme);
        assert_eq!(doc.ucserver.name.as_deref(), Some("UC Server"));
        assert_eq!(
            doc.ucserver.missing_resources(),
            ["uc/sources", "uc/source-lists"]
        );
    }

    #[test]
    fn test_parse_server_document_without_resources() {
        let xml = r#"<response resource="uc"><ucserver version="0.6.0" security-scheme="true"/></response>"#;

        let doc: ServerDocument = from_str(xml).unwrap();
        assert!(doc.ucserver.security_scheme);
        assert_eq!(doc.ucserver.missing_resources().len(), 4);
    }

    #[test]
    fn test_parse_sources() {
        let xml = r#"<response resource="uc/source-lists/uc_default"><sources><source sid="bbc.one" name="BBC One" lcn="001" live="true" linear="true"/><source sid="iplayer" name="iPlayer" live="false"><link href="http://example.com" description="home"/></source><source sid="dvd" name="DVD"/></sources></response>"#;

        let catalog = from_str::<SourcesDocument>(xml).unwrap().into_catalog();
        let sources = catalog.to_vec();
        assert_eq!(sources.len(), 3);

        assert_eq!(sources[0].id.to_wire(), "bbc.one");
        assert_eq!(sources[0].channel_number.as_deref(), Some("001"));
        assert!(sources[0].is_live);

        assert_eq!(sources[1].display_name, "iPlayer");
        assert!(!sources[1].is_live);

        assert_eq!(sources[2].channel_number, None);
        assert!(!sources[2].is_live);
    }

    #[test]
    fn test_parse_empty_sources() {
        let xml = r#"<response resource="uc/source-lists/uc_default"><sources/></response>"#;
        assert!(from_str::<SourcesDocument>(xml).unwrap().into_catalog().is_empty());
    }

    #[test]
    fn test_parse_output_programme() {
        let xml = r#"<response resource="uc/outputs/0"><output name="Main Screen"><settings volume="0.5000" mute="false"/><programme sid="bbc.one" cid="news"/><playback speed="1.00"/></output></response>"#;

        let doc: OutputDocument = from_str(xml).unwrap();
        assert_eq!(doc.resource_ref(), "uc/outputs/0");

        let state = doc.to_output_state();
        assert_eq!(state.source_id, Some(SourceId::from_wire("bbc.one")));
        assert_eq!(state.content_id, Some(ContentId::from_wire("news")));
        assert_eq!(state.volume, Some(0.5));
        assert!(!state.is_app);
    }

    #[test]
    fn test_parse_output_app_without_settings() {
        let xml = r#"<response resource="/uc/outputs/main?x=1"><output name="Main"><app sid="apps" cid=""><controls profile="a:b"/></app></output></response>"#;

        let doc: OutputDocument = from_str(xml).unwrap();
        assert_eq!(doc.resource_ref(), "uc/outputs/main");

        let state = doc.to_output_state();
        assert!(state.is_app);
        assert_eq!(state.source_id, Some(SourceId::from_wire("apps")));
        assert_eq!(state.content_id, None);
        assert_eq!(state.volume, None);
    }

    #[test]
    fn test_parse_output_presenting_nothing() {
        let xml = r#"<response resource="uc/outputs/0"><output name="Main"><settings volume="1.0000"/></output></response>"#;

        let state = from_str::<OutputDocument>(xml).unwrap().to_output_state();
        assert_eq!(state.source_id, None);
        assert_eq!(state.volume, Some(1.0));
    }

    #[test]
    fn test_parse_output_blank_ids() {
        let xml = r#"<response resource="uc/outputs/0"><output name="Main"><programme sid="" cid=""/></output></response>"#;

        let state = from_str::<OutputDocument>(xml).unwrap().to_output_state();
        assert_eq!(state.source_id, None);
        assert_eq!(state.content_id, None);
        assert!(!state.is_app);
    }

    #[test]
    fn test_parse_programme() {
        let xml = r#"<response resource="uc/search/outputs/0"><results more="false"><content cid="news" title="The News" start="2011-05-01T18:00:00Z" duration="1800.00000" interactive="false"><synopsis>Today's headlines.</synopsis></content></results></response>"#;

        let programme = SearchDocument::parse(xml).unwrap().into_programme();
        assert_eq!(programme.title, "The News");
        assert_eq!(programme.duration_seconds, Some(1800));
        assert_eq!(programme.synopsis.as_deref(), Some("Today's headlines."));
        assert_eq!(
            programme.start_time.unwrap().to_rfc3339(),
            "2011-05-01T18:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_programme_from_empty_body() {
        let programme = SearchDocument::parse("").unwrap().into_programme();
        assert_eq!(programme, ProgrammeInfo::default());
    }

    #[test]
    fn test_parse_listing() {
        let xml = r#"<response resource="uc/search/sources/iplayer"><results more="true"><content cid="a.1" title="First"/><content title="No id"/><content cid="c" title="Third"/></results></response>"#;

        let source = SourceId::from_wire("iplayer");
        let page = SearchDocument::parse(xml).unwrap().into_listing(&source);
        assert!(page.more);
        assert_eq!(page.len, 3);
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].0, 0);
        assert_eq!(page.entries[0].1.content_id.to_wire(), "a.1");
        assert_eq!(page.entries[1].0, 2);
        assert_eq!(page.entries[1].1.source_id, source);
    }

    #[test]
    fn test_parse_listing_end() {
        let xml = r#"<response resource="uc/search/sources/iplayer"><results more="false"/></response>"#;

        let page = SearchDocument::parse(xml)
            .unwrap()
            .into_listing(&SourceId::from_wire("iplayer"));
        assert!(!page.more);
        assert_eq!(page.len, 0);
    }

    #[test]
    fn test_parse_events() {
        let xml = r#"<response resource="uc/events"><events notification-id="42"><resource rref="uc/power"/><resource rref="uc/outputs/main"/></events></response>"#;

        let doc: EventsDocument = from_str(xml).unwrap();
        assert_eq!(doc.events.notification_id, "42");
        assert!(doc.events.names("uc/outputs/main"));
        assert!(doc.events.names("/uc/outputs/main"));
        assert!(!doc.events.names("uc/outputs/0"));
    }

    #[test]
    fn test_parse_empty_events() {
        let xml = r#"<response resource="uc/events"><events notification-id="0a"/></response>"#;

        let doc: EventsDocument = from_str(xml).unwrap();
        assert_eq!(doc.events.notification_id, "0a");
        assert!(doc.events.resources.is_empty());
    }

    #[test]
    fn test_malformed_document_is_an_error() {
        assert!(from_str::<EventsDocument>("<response><nothing/></response>").is_err());
        assert!(from_str::<OutputDocument>("not xml at all").is_err());
    }

    #[test]
    fn test_settings_update_body() {
        let xml = SettingsUpdate::volume("uc/outputs/0", 0.5).to_xml().unwrap();
        assert!(xml.starts_with("<response"));
        assert!(xml.contains(r#"resource="uc/outputs/0""#));
        assert!(xml.contains(r#"volume="0.5""#));
        assert!(xml.contains("<settings"));
    }
}
