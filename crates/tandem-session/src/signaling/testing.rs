//! In-memory media engine for signaling tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::peer::{
    AudioSink, CaptureSource, IceServer, MediaStream, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent,
};
use crate::protocol::{IceCandidate, SessionDescription};

#[derive(Default)]
pub(crate) struct FakePeer {
    log: Mutex<Vec<String>>,
}

impl FakePeer {
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_stream(&self, stream: MediaStream) -> Result<(), PeerError> {
        self.record(format!("add_stream {}", stream.id));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_offer".into());
        Ok(SessionDescription::offer("v=0 offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record("create_answer".into());
        Ok(SessionDescription::answer("v=0 answer"))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), PeerError> {
        self.record(format!("set_remote {}", description.sdp));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(format!("candidate {}", candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record("close".into());
    }
}

type Created = (Arc<FakePeer>, mpsc::UnboundedSender<PeerEvent>);

/// Records every connection it creates so tests can drive callbacks.
#[derive(Default)]
pub(crate) struct FakeFactory {
    created: Mutex<HashMap<String, Vec<Created>>>,
}

impl FakeFactory {
    pub(crate) fn created(&self, peer_id: &str) -> usize {
        self.created
            .lock()
            .unwrap()
            .get(peer_id)
            .map_or(0, Vec::len)
    }

    /// Most recent connection for `peer_id`.
    pub(crate) fn peer(&self, peer_id: &str) -> Arc<FakePeer> {
        let created = self.created.lock().unwrap();
        Arc::clone(&created[peer_id].last().unwrap().0)
    }

    pub(crate) fn emit(&self, peer_id: &str, event: PeerEvent) {
        let created = self.created.lock().unwrap();
        let _ = created[peer_id].last().unwrap().1.send(event);
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        peer_id: &str,
        _ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, mpsc::UnboundedReceiver<PeerEvent>), PeerError> {
        let peer = Arc::new(FakePeer::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.created
            .lock()
            .unwrap()
            .entry(peer_id.to_string())
            .or_default()
            .push((Arc::clone(&peer), tx));
        let conn: Arc<dyn PeerConnection> = peer;
        Ok((conn, rx))
    }
}

pub(crate) struct FakeCapture;

#[async_trait]
impl CaptureSource for FakeCapture {
    async fn capture(&self) -> Result<MediaStream, PeerError> {
        Ok(MediaStream::new("mic"))
    }
}

#[derive(Default)]
pub(crate) struct FakeSink {
    attached: Mutex<Vec<(String, String)>>,
    detached: Mutex<Vec<String>>,
}

impl FakeSink {
    pub(crate) fn attached(&self) -> Vec<(String, String)> {
        self.attached.lock().unwrap().clone()
    }

    pub(crate) fn detached(&self) -> Vec<String> {
        self.detached.lock().unwrap().clone()
    }
}

impl AudioSink for FakeSink {
    fn attach(&self, peer_id: &str, stream: MediaStream) {
        self.attached
            .lock()
            .unwrap()
            .push((peer_id.to_string(), stream.id));
    }

    fn detach(&self, peer_id: &str) {
        self.detached.lock().unwrap().push(peer_id.to_string());
    }
}
