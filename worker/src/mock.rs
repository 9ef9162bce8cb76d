//! Scripted transport for tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::sync::Notify;

use crate::http::{HttpClient, Request, TransportError};

pub(crate) const BASE: &str = "http://192.168.0.8:48875";

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Xml(String),
    Fail,
    /// Answers after giving other tasks a turn.
    Slow(String),
    /// Never answers, like a long poll with nothing to report.
    Hang,
}

#[derive(Default)]
struct Script {
    once: HashMap<String, VecDeque<Reply>>,
    always: HashMap<String, Reply>,
    requests: Vec<Request>,
}

/// Answers requests from canned replies keyed by `path?query` or, failing
/// that, by path alone. Unscripted requests fail.
#[derive(Default)]
pub(crate) struct MockHttp {
    script: Mutex<Script>,
    seen: Notify,
}

impl MockHttp {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn base() -> Arc<str> {
        Arc::from(BASE)
    }

    pub(crate) fn always(&self, key: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .always
            .insert(key.to_string(), reply);
        self
    }

    pub(crate) fn xml(&self, key: &str, body: &str) -> &Self {
        self.always(key, Reply::Xml(body.to_string()))
    }

    /// Queue a reply served once, ahead of any `always` reply for the key.
    pub(crate) fn once(&self, key: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .once
            .entry(key.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.script.lock().unwrap().requests.clone()
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        self.requests().iter().map(Request::target).collect()
    }

    pub(crate) fn count(&self, target: &str) -> usize {
        self.targets().iter().filter(|t| *t == target).count()
    }

    /// Wait until `target` has been requested `times` times.
    pub(crate) async fn wait_for(&self, target: &str, times: usize) {
        let wait = async {
            loop {
                let notified = self.seen.notified();
                if self.count(target) >= times {
                    return;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(Duration::from_secs(5), wait).await.is_err() {
            panic!("timed out waiting for {target}, saw {:?}", self.targets());
        }
    }

    fn reply(&self, request: &Request) -> Option<Reply> {
        let mut script = self.script.lock().unwrap();
        script.requests.push(request.clone());

        let target = request.target();
        for key in [target.as_str(), request.path.as_str()] {
            if let Some(reply) = script.once.get_mut(key).and_then(VecDeque::pop_front) {
                return Some(reply);
            }
            if let Some(reply) = script.always.get(key) {
                return Some(reply.clone());
            }
        }
        None
    }
}

impl HttpClient for MockHttp {
    async fn send(&self, request: Request) -> Result<String, TransportError> {
        let reply = self.reply(&request);
        self.seen.notify_waiters();

        match reply {
            Some(Reply::Xml(body)) => Ok(body),
            Some(Reply::Slow(body)) => {
                tokio::task::yield_now().await;
                Ok(body)
            }
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Fail) | None => Err(TransportError::Status {
                url: request.url(),
                status: 503,
            }),
        }
    }
}

/// Canned documents shaped like the server's.
pub(crate) mod docs {
    pub(crate) fn server(version: &str, security: bool) -> String {
        format!(
            r#"<response resource="/uc"><ucserver name="Living room" version="{version}" security-scheme="{security}">
                <resource rref="uc/events"/><resource rref="uc/sources"/>
                <resource rref="uc/source-lists"/><resource rref="uc/outputs"/>
            </ucserver></response>"#
        )
    }

    pub(crate) fn sources() -> String {
        r#"<response resource="/uc/source-lists/uc_default"><sources>
            <source sid="bbc.one" name="BBC One" lcn="001" live="true"/>
            <source sid="iplayer" name="iPlayer" live="false"/>
        </sources></response>"#
            .to_string()
    }

    pub(crate) fn output(sid: &str, cid: &str, volume: f32) -> String {
        output_at("uc/outputs/0", sid, cid, volume)
    }

    pub(crate) fn output_at(resource: &str, sid: &str, cid: &str, volume: f32) -> String {
        format!(
            r#"<response resource="/{resource}"><output name="main">
                <settings volume="{volume}"/><programme sid="{sid}" cid="{cid}"/>
            </output></response>"#
        )
    }

    pub(crate) fn programme(title: &str) -> String {
        format!(
            r#"<response resource="/uc/search/outputs/0"><results more="false">
                <content cid="c1" title="{title}" start="2011-05-01T18:00:00Z" duration="1800.4">
                    <synopsis>Headlines</synopsis>
                </content>
            </results></response>"#
        )
    }

    pub(crate) fn events(id: &str, rrefs: &[&str]) -> String {
        let resources: String = rrefs
            .iter()
            .map(|rref| format!(r#"<resource rref="{rref}"/>"#))
            .collect();
        format!(
            r#"<response resource="/uc/events"><events notification-id="{id}">{resources}</events></response>"#
        )
    }

    pub(crate) fn listing(start: usize, count: usize, more: bool) -> String {
        let content: String = (start..start + count)
            .map(|n| format!(r#"<content cid="c{n}" title="Item {n}"/>"#))
            .collect();
        format!(r#"<response resource="/uc/search/sources/iplayer"><results more="{more}">{content}</results></response>"#)
    }
}
