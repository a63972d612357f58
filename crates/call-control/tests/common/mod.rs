// In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use rvoip_call_control::{
    AdapterKind, Call, CallControlConfig, CallControlContext, Direction, Endpoint, EventSubscriber, MediaError,
    MediaObjectId, MediaResource, MediaResult, MediaService, MediaServiceFactory, Mixer, MixerConfig,
    MixerListener, MixerMediaEvent, MixerResource, NegotiationEvent, NegotiationEventKind, ParticipantEvent,
    Result, SdpNegotiator, SignalRequest, SignalResponse, SignalingSession,
};

pub const LOCAL_SDP: &str = "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=-\r\nc=IN IP4 10.0.0.1\r\nt=0 0\r\nm=audio 4000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=sendrecv\r\n";
pub const REMOTE_SDP: &str = "v=0\r\no=- 2 2 IN IP4 10.0.0.2\r\ns=-\r\nc=IN IP4 10.0.0.2\r\nt=0 0\r\nm=audio 5000 RTP/AVP 0\r\na=rtpmap:0 PCMU/8000\r\na=sendrecv\r\n";

fn pair(a: MediaObjectId, b: MediaObjectId) -> (MediaObjectId, MediaObjectId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The media server: which media objects are currently connected
#[derive(Default)]
pub struct MediaFabric {
    links: Mutex<HashMap<(MediaObjectId, MediaObjectId), Direction>>,
    fail_join: Mutex<HashSet<MediaObjectId>>,
    fail_unjoin: Mutex<HashSet<MediaObjectId>>,
    join_delay: Mutex<Option<Duration>>,
    unjoin_delay: Mutex<Option<Duration>>,
    joins: AtomicUsize,
}

impl MediaFabric {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connected(&self, a: MediaObjectId, b: MediaObjectId) -> bool {
        self.links.lock().contains_key(&pair(a, b))
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn join_count(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn fail_joins_of(&self, id: MediaObjectId) {
        self.fail_join.lock().insert(id);
    }

    pub fn fail_unjoins_of(&self, id: MediaObjectId) {
        self.fail_unjoin.lock().insert(id);
    }

    pub fn heal(&self) {
        self.fail_join.lock().clear();
        self.fail_unjoin.lock().clear();
    }

    pub fn delay_joins(&self, delay: Duration) {
        *self.join_delay.lock() = Some(delay);
    }

    pub fn delay_unjoins(&self, delay: Duration) {
        *self.unjoin_delay.lock() = Some(delay);
    }
}

#[derive(Debug)]
pub struct FakeMedia {
    id: MediaObjectId,
    fabric: Arc<MediaFabric>,
    joinable: AtomicBool,
    released: AtomicBool,
    fail_release: AtomicBool,
    releases: AtomicUsize,
}

impl std::fmt::Debug for MediaFabric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFabric").field("links", &self.link_count()).finish()
    }
}

impl FakeMedia {
    pub fn new(fabric: &Arc<MediaFabric>) -> Arc<Self> {
        Arc::new(Self {
            id: MediaObjectId::new(),
            fabric: fabric.clone(),
            joinable: AtomicBool::new(true),
            released: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn set_joinable(&self, joinable: bool) {
        self.joinable.store(joinable, Ordering::SeqCst);
    }

    pub fn fail_release(&self) {
        self.fail_release.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResource for FakeMedia {
    fn id(&self) -> MediaObjectId {
        self.id
    }

    fn is_joinable(&self) -> bool {
        self.joinable.load(Ordering::SeqCst)
    }

    async fn join(&self, direction: Direction, peer: &Arc<dyn MediaResource>) -> MediaResult<()> {
        let delay = *self.fabric.join_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fabric.joins.fetch_add(1, Ordering::SeqCst);
        {
            let failing = self.fabric.fail_join.lock();
            if failing.contains(&self.id) || failing.contains(&peer.id()) {
                return Err(MediaError::new("join", "injected failure"));
            }
        }
        if self.is_released() {
            return Err(MediaError::new("join", "released"));
        }
        self.fabric.links.lock().insert(pair(self.id, peer.id()), direction);
        Ok(())
    }

    async fn unjoin(&self, peer: &Arc<dyn MediaResource>) -> MediaResult<()> {
        let delay = *self.fabric.unjoin_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        {
            let failing = self.fabric.fail_unjoin.lock();
            if failing.contains(&self.id) || failing.contains(&peer.id()) {
                return Err(MediaError::new("unjoin", "injected failure"));
            }
        }
        match self.fabric.links.lock().remove(&pair(self.id, peer.id())) {
            Some(_) => Ok(()),
            None => Err(MediaError::new("unjoin", "not joined")),
        }
    }

    async fn release(&self) -> MediaResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.released.store(true, Ordering::SeqCst);
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(MediaError::new("release", "injected failure"));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Listeners(Mutex<Vec<Arc<dyn MixerListener>>>);

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} listeners", self.0.lock().len())
    }
}

#[derive(Debug)]
pub struct FakeMixer {
    media: Arc<FakeMedia>,
    fabric: Arc<MediaFabric>,
    fail_adapter: AtomicBool,
    adapters: Mutex<Vec<Arc<FakeMedia>>>,
    listeners: Listeners,
}

impl FakeMixer {
    pub fn new(fabric: &Arc<MediaFabric>) -> Arc<Self> {
        Arc::new(Self {
            media: FakeMedia::new(fabric),
            fabric: fabric.clone(),
            fail_adapter: AtomicBool::new(false),
            adapters: Mutex::new(Vec::new()),
            listeners: Listeners::default(),
        })
    }

    pub fn media(&self) -> &Arc<FakeMedia> {
        &self.media
    }

    pub fn fail_adapter_creation(&self) {
        self.fail_adapter.store(true, Ordering::SeqCst);
    }

    pub fn adapters(&self) -> Vec<Arc<FakeMedia>> {
        self.adapters.lock().clone()
    }

    /// Report active inputs the way the media server would, from its own thread
    pub fn emit_active_inputs(&self, active_inputs: Vec<MediaObjectId>) {
        let listeners: Vec<_> = self.listeners.0.lock().clone();
        for listener in listeners {
            listener.on_mixer_event(MixerMediaEvent::ActiveInputsChanged {
                active_inputs: active_inputs.clone(),
            });
        }
    }
}

#[async_trait]
impl MediaResource for FakeMixer {
    fn id(&self) -> MediaObjectId {
        self.media.id()
    }

    fn is_joinable(&self) -> bool {
        self.media.is_joinable()
    }

    async fn join(&self, direction: Direction, peer: &Arc<dyn MediaResource>) -> MediaResult<()> {
        self.media.join(direction, peer).await
    }

    async fn unjoin(&self, peer: &Arc<dyn MediaResource>) -> MediaResult<()> {
        self.media.unjoin(peer).await
    }

    async fn release(&self) -> MediaResult<()> {
        self.media.release().await
    }
}

#[async_trait]
impl MixerResource for FakeMixer {
    async fn create_adapter(&self, kind: AdapterKind) -> MediaResult<Arc<dyn MediaResource>> {
        assert_eq!(kind, AdapterKind::DtmfClamp);
        if self.fail_adapter.load(Ordering::SeqCst) {
            return Err(MediaError::new("create_adapter", "injected failure"));
        }
        let adapter = FakeMedia::new(&self.fabric);
        self.adapters.lock().push(adapter.clone());
        Ok(adapter)
    }

    fn add_listener(&self, listener: Arc<dyn MixerListener>) {
        self.listeners.0.lock().push(listener);
    }

    fn as_media_resource(self: Arc<Self>) -> Arc<dyn MediaResource> {
        self
    }
}

/// Media negotiation that answers from a separate OS thread
pub struct FakeNegotiator {
    call: Mutex<Weak<Call>>,
    fail: AtomicBool,
    silent: AtomicBool,
    answer: Bytes,
    offers: Mutex<Vec<Bytes>>,
    answers: Mutex<Vec<Bytes>>,
}

impl FakeNegotiator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            call: Mutex::new(Weak::new()),
            fail: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            answer: Bytes::from_static(LOCAL_SDP.as_bytes()),
            offers: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
        })
    }

    pub fn attach(&self, call: &Arc<Call>) {
        *self.call.lock() = Arc::downgrade(call);
    }

    pub fn fail_negotiations(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn offers(&self) -> Vec<Bytes> {
        self.offers.lock().clone()
    }

    pub fn answers(&self) -> Vec<Bytes> {
        self.answers.lock().clone()
    }

    fn respond(&self, event: NegotiationEvent) {
        if self.silent.load(Ordering::SeqCst) {
            return;
        }
        let Some(call) = self.call.lock().upgrade() else {
            return;
        };
        std::thread::spawn(move || call.on_negotiation_event(event));
    }
}

#[async_trait]
impl SdpNegotiator for FakeNegotiator {
    async fn process_sdp_offer(&self, offer: Bytes) -> Result<()> {
        self.offers.lock().push(offer);
        let event = if self.fail.load(Ordering::SeqCst) {
            NegotiationEvent::failure(NegotiationEventKind::AnswerGenerated, "no common codec")
        } else {
            NegotiationEvent::success(NegotiationEventKind::AnswerGenerated, Some(self.answer.clone()))
        };
        self.respond(event);
        Ok(())
    }

    async fn process_sdp_answer(&self, answer: Bytes) -> Result<()> {
        self.answers.lock().push(answer);
        let event = if self.fail.load(Ordering::SeqCst) {
            NegotiationEvent::failure(NegotiationEventKind::AnswerProcessed, "answer rejected")
        } else {
            NegotiationEvent::success(NegotiationEventKind::AnswerProcessed, None)
        };
        self.respond(event);
        Ok(())
    }
}

/// Signaling session that answers re-INVITEs from a separate OS thread
pub struct FakeSession {
    call: Mutex<Weak<Call>>,
    reinvite_status: AtomicU16,
    auto_respond: AtomicBool,
    fail_ack: AtomicBool,
    answer: Bytes,
    requests: Mutex<Vec<SignalRequest>>,
    responses: Mutex<Vec<(SignalRequest, u16, Option<Bytes>)>>,
    acks: Mutex<Vec<(SignalResponse, Option<Bytes>)>>,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            call: Mutex::new(Weak::new()),
            reinvite_status: AtomicU16::new(200),
            auto_respond: AtomicBool::new(true),
            fail_ack: AtomicBool::new(false),
            answer: Bytes::from_static(REMOTE_SDP.as_bytes()),
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
        })
    }

    pub fn attach(&self, call: &Arc<Call>) {
        *self.call.lock() = Arc::downgrade(call);
    }

    pub fn answer_reinvites_with(&self, status: u16) {
        self.reinvite_status.store(status, Ordering::SeqCst);
    }

    pub fn stay_silent(&self) {
        self.auto_respond.store(false, Ordering::SeqCst);
    }

    pub fn fail_acks(&self) {
        self.fail_ack.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<SignalRequest> {
        self.requests.lock().clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<SignalRequest> {
        self.requests().into_iter().filter(|r| r.method == method).collect()
    }

    pub fn responses(&self) -> Vec<(SignalRequest, u16, Option<Bytes>)> {
        self.responses.lock().clone()
    }

    pub fn acks(&self) -> Vec<(SignalResponse, Option<Bytes>)> {
        self.acks.lock().clone()
    }
}

#[async_trait]
impl SignalingSession for FakeSession {
    async fn send_request(&self, request: SignalRequest) -> Result<()> {
        self.requests.lock().push(request.clone());
        if request.method != "INVITE" || !self.auto_respond.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Some(call) = self.call.lock().upgrade() else {
            return Ok(());
        };
        let mut response = SignalResponse::new(self.reinvite_status.load(Ordering::SeqCst), request);
        if response.is_success() {
            response = response.with_content(self.answer.clone());
        }
        std::thread::spawn(move || call.handle_reinvite_response(response));
        Ok(())
    }

    async fn send_response(&self, request: &SignalRequest, status: u16, content: Option<Bytes>) -> Result<()> {
        self.responses.lock().push((request.clone(), status, content));
        Ok(())
    }

    async fn send_ack(&self, response: &SignalResponse, content: Option<Bytes>) -> Result<()> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(rvoip_call_control::CallControlError::signal("ACK transport failure"));
        }
        self.acks.lock().push((response.clone(), content));
        Ok(())
    }
}

pub struct FakeMediaService {
    group: Arc<FakeMedia>,
    released: AtomicBool,
    fail_release: bool,
    outputs: Mutex<Vec<String>>,
}

impl FakeMediaService {
    pub fn group(&self) -> &Arc<FakeMedia> {
        &self.group
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn outputs(&self) -> Vec<String> {
        self.outputs.lock().clone()
    }
}

#[async_trait]
impl MediaService for FakeMediaService {
    fn media_group(&self) -> Arc<dyn MediaResource> {
        self.group.clone()
    }

    async fn output(&self, content: &str) -> MediaResult<()> {
        self.outputs.lock().push(content.to_string());
        Ok(())
    }

    async fn input(&self, _grammar: &str) -> MediaResult<String> {
        Ok("1".to_string())
    }

    async fn record(&self, _uri: &str) -> MediaResult<()> {
        Ok(())
    }

    async fn release(&self) -> MediaResult<()> {
        self.released.store(true, Ordering::SeqCst);
        if self.fail_release {
            return Err(MediaError::new("release", "injected failure"));
        }
        Ok(())
    }
}

pub struct FakeMediaServiceFactory {
    fabric: Arc<MediaFabric>,
    created: Mutex<Vec<Arc<FakeMediaService>>>,
    fail_releases: AtomicBool,
}

impl FakeMediaServiceFactory {
    pub fn created(&self) -> Vec<Arc<FakeMediaService>> {
        self.created.lock().clone()
    }

    /// Services created from now on fail to release
    pub fn fail_releases(&self) {
        self.fail_releases.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaServiceFactory for FakeMediaServiceFactory {
    async fn create(&self, _participant: MediaObjectId) -> Result<Arc<dyn MediaService>> {
        let service = Arc::new(FakeMediaService {
            group: FakeMedia::new(&self.fabric),
            released: AtomicBool::new(false),
            fail_release: self.fail_releases.load(Ordering::SeqCst),
            outputs: Mutex::new(Vec::new()),
        });
        self.created.lock().push(service.clone());
        Ok(service)
    }
}

pub struct TestCall {
    pub call: Arc<Call>,
    pub media: Arc<FakeMedia>,
    pub negotiator: Arc<FakeNegotiator>,
    pub session: Arc<FakeSession>,
}

pub struct TestMixer {
    pub mixer: Arc<Mixer>,
    pub resource: Arc<FakeMixer>,
}

pub struct Harness {
    pub fabric: Arc<MediaFabric>,
    pub context: CallControlContext,
    pub media_services: Option<Arc<FakeMediaServiceFactory>>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(CallControlConfig::default())
    }

    pub fn with_config(config: CallControlConfig) -> Self {
        Self {
            fabric: MediaFabric::new(),
            context: CallControlContext::new(config).expect("valid config"),
            media_services: None,
        }
    }

    pub fn with_media_services(mut self) -> Self {
        let factory = Arc::new(FakeMediaServiceFactory {
            fabric: self.fabric.clone(),
            created: Mutex::new(Vec::new()),
            fail_releases: AtomicBool::new(false),
        });
        self.context = self.context.clone().with_media_services(factory.clone());
        self.media_services = Some(factory);
        self
    }

    pub fn call(&self, uri: &str) -> TestCall {
        let media = FakeMedia::new(&self.fabric);
        let negotiator = FakeNegotiator::new();
        let session = FakeSession::new();
        let call = Call::new(
            &self.context,
            Endpoint::new(uri),
            media.clone(),
            negotiator.clone(),
            session.clone(),
        )
        .expect("call");
        negotiator.attach(&call);
        session.attach(&call);
        TestCall {
            call,
            media,
            negotiator,
            session,
        }
    }

    pub fn answered_call(&self, uri: &str) -> TestCall {
        let test_call = self.call(uri);
        test_call
            .call
            .mark_answered(Bytes::from_static(LOCAL_SDP.as_bytes()), Bytes::from_static(REMOTE_SDP.as_bytes()))
            .expect("answer");
        test_call
    }

    pub fn mixer(&self, config: MixerConfig) -> TestMixer {
        let resource = FakeMixer::new(&self.fabric);
        let mixer = Mixer::new(
            &self.context,
            Endpoint::new("mscontrol://conference"),
            resource.clone(),
            config,
        )
        .expect("mixer");
        TestMixer { mixer, resource }
    }
}

/// Next event matching `wanted`, skipping others
pub async fn next_event<F>(subscriber: &mut EventSubscriber, mut wanted: F) -> ParticipantEvent
where
    F: FnMut(&ParticipantEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = subscriber.receive().await.expect("event stream closed");
            if wanted(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn sdp(text: &'static str) -> Bytes {
    Bytes::from_static(text.as_bytes())
}
