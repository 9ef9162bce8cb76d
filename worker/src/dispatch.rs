use std::sync::{Arc, Mutex, PoisonError};

use ucremote_core::{ContentId, SourceId, wire::SettingsUpdate};

use crate::{
    engine::SyncEngine,
    error::ActionError,
    http::{HttpClient, Request},
    pager::{ContentPager, PagerOptions, Window},
};

/// Outcome of picking a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceSelection {
    /// A live source: the output has been asked to switch to it.
    Switched,
    /// A browsable source: pick something from its listing next.
    Browse(Window),
}

/// Turns user intent into mutation requests against the connected server.
/// The resulting state change arrives through the engine's event stream.
pub struct ActionDispatcher<H> {
    engine: SyncEngine<H>,
    options: PagerOptions,
    /// The pager and the engine session it was made for.
    pager: Mutex<Option<(u64, ContentPager<H>)>>,
}

struct Target {
    base: Arc<str>,
    output_ref: String,
}

impl<H: HttpClient> ActionDispatcher<H> {
    pub fn new(engine: SyncEngine<H>, options: PagerOptions) -> Self {
        Self {
            engine,
            options,
            pager: Mutex::new(None),
        }
    }

    fn target(&self) -> Result<Target, ActionError> {
        let base = self.engine.base_url().ok_or(ActionError::NotConnected)?;
        let output_ref = self.engine.output_ref().ok_or(ActionError::NotConnected)?;
        Ok(Target { base, output_ref })
    }

    /// Pager for the current session, replaced on every reconnect.
    pub fn pager(&self) -> Result<ContentPager<H>, ActionError> {
        let session = self.engine.session_id().ok_or(ActionError::NotConnected)?;
        let base = self.engine.base_url().ok_or(ActionError::NotConnected)?;
        let mut pager = self.pager.lock().unwrap_or_else(PoisonError::into_inner);
        match pager.as_ref() {
            Some((id, current)) if *id == session => Ok(current.clone()),
            _ => {
                let fresh = ContentPager::new(self.engine.http(), base, self.options);
                *pager = Some((session, fresh.clone()));
                Ok(fresh)
            }
        }
    }

    /// Fire a mutation. Only transport failures come back: the response body
    /// is ignored and the new state is left for the event stream to report.
    async fn send(&self, request: Request) -> Result<(), ActionError> {
        tracing::info!("sending {request}");
        self.engine.http().send(request).await?;
        Ok(())
    }

    pub async fn select_source(&self, source: &SourceId) -> Result<SourceSelection, ActionError> {
        let target = self.target()?;
        let record = self
            .engine
            .source(source)
            .ok_or_else(|| ActionError::UnknownSource(source.clone()))?;

        if !record.is_live {
            // open always starts the listing over, even for the same source
            let window = self.pager()?.open(source).await?;
            return Ok(SourceSelection::Browse(window));
        }

        let request =
            Request::post(&target.base, target.output_ref).query("sid", source.to_wire());
        self.send(request).await?;
        Ok(SourceSelection::Switched)
    }

    pub async fn select_content(
        &self,
        source: &SourceId,
        content: &ContentId,
    ) -> Result<(), ActionError> {
        let target = self.target()?;
        if self.engine.source(source).is_none() {
            return Err(ActionError::UnknownSource(source.clone()));
        }

        let request = Request::post(&target.base, target.output_ref)
            .query("sid", source.to_wire())
            .query("cid", content.to_wire());
        self.send(request).await
    }

    /// Ask the output to change volume to `volume`, a fraction in `[0, 1]`.
    pub async fn set_volume(&self, volume: f32) -> Result<(), ActionError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(ActionError::VolumeOutOfRange(volume));
        }

        let target = self.target()?;
        let resource = format!("/{}", target.output_ref);
        let body = SettingsUpdate::volume(&resource, volume).to_xml()?;
        let request =
            Request::put(&target.base, format!("{}/settings", target.output_ref)).body(body);
        self.send(request).await
    }
}
