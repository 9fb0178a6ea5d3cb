//! Test doubles shared by the unit tests of this crate.
//!
//! Besides recording subscribers and producers this holds [`Pair`], two session cores wired
//! back to back in memory, which lets the engine be exercised without a runtime or transport.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::channel::oneshot;
use futures::{FutureExt, StreamExt};

use crate::frame::{Envelope, Frame, Payload, SetupPayload, StreamId};
use crate::handler::{
    DefaultRequestHandler, RequestHandler, StreamSink, Subscriber, SubscriberFactory, Subscription,
};
use crate::protocol::{HandlerError, StreamError};
use crate::session::command::{self, Command, CommandReceiver, CommandSender, EngineCommand};
use crate::session::{LoggingListener, ResumeOutcome, SessionConfig, SessionCore, SessionListener, SessionRole};

/// What a [`RecordingSubscriber`] observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Subscribed,
    Next(String),
    Complete,
    Error(StreamError),
}

#[derive(Default)]
struct Recording {
    signals: Vec<Signal>,
    subscription: Option<Box<dyn Subscription>>,
}

/// A consumer that records every signal and requests `initial` items on subscribe.
pub(crate) struct RecordingSubscriber {
    shared: Arc<Mutex<Recording>>,
    initial: u32,
}

/// The test's view of a [`RecordingSubscriber`], usable after it was handed away.
#[derive(Clone)]
pub(crate) struct SubscriberTap {
    shared: Arc<Mutex<Recording>>,
}

impl RecordingSubscriber {
    pub(crate) fn new(initial: u32) -> (Self, SubscriberTap) {
        let shared = Arc::new(Mutex::new(Recording::default()));
        (Self { shared: shared.clone(), initial }, SubscriberTap { shared })
    }
}

impl Subscriber for RecordingSubscriber {
    fn on_subscribe(&mut self, mut subscription: Box<dyn Subscription>) {
        if self.initial > 0 {
            subscription.request(self.initial);
        }
        let mut recording = self.shared.lock().unwrap();
        recording.signals.push(Signal::Subscribed);
        recording.subscription = Some(subscription);
    }

    fn on_next(&mut self, payload: Payload) {
        let item = String::from_utf8_lossy(payload.data()).into_owned();
        self.shared.lock().unwrap().signals.push(Signal::Next(item));
    }

    fn on_complete(&mut self) {
        self.shared.lock().unwrap().signals.push(Signal::Complete);
    }

    fn on_error(&mut self, error: StreamError) {
        self.shared.lock().unwrap().signals.push(Signal::Error(error));
    }
}

impl SubscriberTap {
    pub(crate) fn signals(&self) -> Vec<Signal> {
        self.shared.lock().unwrap().signals.clone()
    }

    pub(crate) fn items(&self) -> Vec<String> {
        self.signals()
            .into_iter()
            .filter_map(|signal| match signal {
                Signal::Next(item) => Some(item),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn terminal_count(&self) -> usize {
        self.signals().iter().filter(|signal| matches!(signal, Signal::Complete | Signal::Error(_))).count()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.signals().contains(&Signal::Complete)
    }

    pub(crate) fn error(&self) -> Option<StreamError> {
        self.signals().into_iter().find_map(|signal| match signal {
            Signal::Error(error) => Some(error),
            _ => None,
        })
    }

    pub(crate) fn request(&self, n: u32) {
        if let Some(subscription) = self.shared.lock().unwrap().subscription.as_mut() {
            subscription.request(n);
        }
    }

    pub(crate) fn cancel(&self) {
        if let Some(subscription) = self.shared.lock().unwrap().subscription.as_mut() {
            subscription.cancel();
        }
    }
}

#[derive(Debug, Default)]
struct ProducerLog {
    requested: u64,
    canceled: bool,
}

/// A producer subscription that records the credit it was given and whether it was canceled.
pub(crate) struct TestProducer {
    log: Arc<Mutex<ProducerLog>>,
}

#[derive(Clone)]
pub(crate) struct ProducerTap {
    log: Arc<Mutex<ProducerLog>>,
}

impl ProducerTap {
    pub(crate) fn new() -> (TestProducer, ProducerTap) {
        let log = Arc::new(Mutex::new(ProducerLog::default()));
        (TestProducer { log: log.clone() }, ProducerTap { log })
    }

    pub(crate) fn requested(&self) -> u64 {
        self.log.lock().unwrap().requested
    }

    pub(crate) fn canceled(&self) -> bool {
        self.log.lock().unwrap().canceled
    }
}

impl Subscription for TestProducer {
    fn request(&mut self, n: u32) {
        self.log.lock().unwrap().requested += u64::from(n);
    }

    fn cancel(&mut self) {
        self.log.lock().unwrap().canceled = true;
    }
}

/// How a [`ScriptedHandler`] answers stream requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Script {
    /// Subscribe a [`TestProducer`] to the stream's sink.
    Serve,
    Fail,
    Panic,
}

#[derive(Default)]
struct Served {
    sinks: Vec<StreamSink>,
    producers: Vec<ProducerTap>,
    consumers: Vec<SubscriberTap>,
    fire_and_forget: Vec<String>,
    metadata: Vec<Bytes>,
}

/// A request handler whose responder streams are driven from the test through a [`HandlerTap`].
pub(crate) struct ScriptedHandler {
    served: Arc<Mutex<Served>>,
    script: Script,
    channel_demand: u32,
}

#[derive(Clone)]
pub(crate) struct HandlerTap {
    served: Arc<Mutex<Served>>,
}

impl ScriptedHandler {
    pub(crate) fn new(script: Script) -> (Self, HandlerTap) {
        Self::with_channel_demand(script, 4)
    }

    /// `channel_demand` is what the consumer of an inbound channel requests on subscribe.
    pub(crate) fn with_channel_demand(script: Script, channel_demand: u32) -> (Self, HandlerTap) {
        let served = Arc::new(Mutex::new(Served::default()));
        (Self { served: served.clone(), script, channel_demand }, HandlerTap { served })
    }

    fn serve(&mut self, factory: &SubscriberFactory) -> Result<(), HandlerError> {
        match self.script {
            Script::Fail => Err("no such route".into()),
            Script::Panic => panic!("handler bug"),
            Script::Serve => {
                let mut sink = factory.create_subscriber();
                let (producer, tap) = ProducerTap::new();
                sink.on_subscribe(Box::new(producer));
                let mut served = self.served.lock().unwrap();
                served.sinks.push(sink);
                served.producers.push(tap);
                Ok(())
            }
        }
    }
}

impl RequestHandler for ScriptedHandler {
    fn handle_fire_and_forget(&mut self, request: Payload) -> Result<(), HandlerError> {
        let item = String::from_utf8_lossy(request.data()).into_owned();
        self.served.lock().unwrap().fire_and_forget.push(item);
        Ok(())
    }

    fn handle_request_response(&mut self, _request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        self.serve(&factory)
    }

    fn handle_request_stream(&mut self, _request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        self.serve(&factory)
    }

    fn handle_request_subscription(&mut self, _request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        self.serve(&factory)
    }

    fn handle_request_channel(
        &mut self,
        _request: Payload,
        factory: SubscriberFactory,
    ) -> Result<Box<dyn Subscriber>, HandlerError> {
        self.serve(&factory)?;
        let (consumer, tap) = RecordingSubscriber::new(self.channel_demand);
        self.served.lock().unwrap().consumers.push(tap);
        Ok(Box::new(consumer))
    }

    fn handle_metadata_push(&mut self, metadata: Bytes) -> Result<(), HandlerError> {
        self.served.lock().unwrap().metadata.push(metadata);
        Ok(())
    }
}

impl HandlerTap {
    /// Responder streams the handler accepted so far.
    pub(crate) fn streams(&self) -> usize {
        self.served.lock().unwrap().sinks.len()
    }

    pub(crate) fn stream_id(&self, stream: usize) -> Option<StreamId> {
        self.served.lock().unwrap().sinks[stream].stream_id()
    }

    pub(crate) fn emit(&self, stream: usize, item: &str) {
        self.served.lock().unwrap().sinks[stream].on_next(Payload::from(item.to_string()));
    }

    pub(crate) fn complete(&self, stream: usize) {
        self.served.lock().unwrap().sinks[stream].on_complete();
    }

    pub(crate) fn fail(&self, stream: usize, error: StreamError) {
        self.served.lock().unwrap().sinks[stream].on_error(error);
    }

    pub(crate) fn requested(&self, stream: usize) -> u64 {
        self.served.lock().unwrap().producers[stream].requested()
    }

    pub(crate) fn canceled(&self, stream: usize) -> bool {
        self.served.lock().unwrap().producers[stream].canceled()
    }

    /// Consumer of the `channel`-th inbound channel.
    pub(crate) fn consumer(&self, channel: usize) -> SubscriberTap {
        self.served.lock().unwrap().consumers[channel].clone()
    }

    pub(crate) fn fire_and_forget(&self) -> Vec<String> {
        self.served.lock().unwrap().fire_and_forget.clone()
    }

    pub(crate) fn metadata(&self) -> Vec<Bytes> {
        self.served.lock().unwrap().metadata.clone()
    }
}

/// One side of an in-memory pair: a session core and the receiving end of its command queue.
pub(crate) struct Peer {
    pub(crate) core: SessionCore,
    sender: CommandSender,
    receiver: CommandReceiver,
}

impl Peer {
    pub(crate) fn new(
        role: SessionRole,
        config: SessionConfig,
        handler: Box<dyn RequestHandler>,
        listener: Box<dyn SessionListener>,
    ) -> Self {
        let (sender, receiver) = command::channel();
        let core = SessionCore::new(role, config, handler, listener, sender.clone());
        Self { core, sender, receiver }
    }

    pub(crate) fn client() -> Self {
        Self::new(SessionRole::Client, SessionConfig::default(), Box::new(DefaultRequestHandler), Box::new(LoggingListener))
    }

    pub(crate) fn server(handler: impl RequestHandler + 'static) -> Self {
        Self::new(SessionRole::Server, SessionConfig::default(), Box::new(handler), Box::new(LoggingListener))
    }

    pub(crate) fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Applies a command as the session facade would, then whatever it triggered.
    pub(crate) fn command(&mut self, command: EngineCommand) {
        self.core.handle_command(command);
        self.pump();
    }

    /// Applies queued engine commands until the queue is empty; returns how many ran.
    pub(crate) fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Some(Some(command)) = self.receiver.next().now_or_never() {
            if let Command::Engine(command) = command {
                self.core.handle_command(command);
                applied += 1;
            }
        }
        applied
    }

    /// Takes everything queued for the transport.
    pub(crate) fn outbound(&mut self) -> Vec<Envelope> {
        std::iter::from_fn(|| self.core.poll_outbound()).collect()
    }
}

/// A client and a server core exchanging envelopes directly.
pub(crate) struct Pair {
    pub(crate) client: Peer,
    pub(crate) server: Peer,
    /// Every frame delivered so far, tagged with the role that sent it.
    pub(crate) delivered: Vec<(SessionRole, Frame)>,
}

impl Pair {
    pub(crate) fn new(server_handler: impl RequestHandler + 'static) -> Self {
        Self::with_peers(Peer::client(), Peer::server(server_handler))
    }

    pub(crate) fn with_peers(client: Peer, server: Peer) -> Self {
        Self { client, server, delivered: Vec::new() }
    }

    pub(crate) fn connect(&mut self, setup: SetupPayload) {
        self.client.core.connect(setup).unwrap();
        self.run();
    }

    /// Moves envelopes both ways and applies commands until neither side has anything left.
    pub(crate) fn run(&mut self) {
        for _ in 0..10_000 {
            let mut progress = self.client.pump() + self.server.pump();

            for envelope in self.client.outbound() {
                progress += 1;
                self.delivered.push((SessionRole::Client, envelope.frame.clone()));
                match envelope.frame {
                    Frame::Resume { last_received_server_position, first_available_client_position, .. } => {
                        self.server.core.resume_from_peer(last_received_server_position, first_available_client_position);
                    }
                    _ => self.server.core.handle_envelope(envelope),
                }
            }
            for envelope in self.server.outbound() {
                progress += 1;
                self.delivered.push((SessionRole::Server, envelope.frame.clone()));
                self.client.core.handle_envelope(envelope);
            }

            if progress == 0 {
                return;
            }
        }
        panic!("session pair never went quiet");
    }

    /// Applies pending commands but throws away what either side was about to send.
    pub(crate) fn lose_in_flight(&mut self) {
        self.client.pump();
        self.server.pump();
        self.client.outbound();
        self.server.outbound();
    }

    /// Both sides lose the transport.
    pub(crate) fn disconnect(&mut self) {
        self.lose_in_flight();
        self.client.core.detach("transport lost");
        self.server.core.detach("transport lost");
    }

    /// Resumes over a fresh in-memory transport and reports the client's outcome.
    pub(crate) fn resume(&mut self) -> Option<ResumeOutcome> {
        let (outcome, mut receiver) = oneshot::channel();
        self.client.core.begin_resume(outcome);
        self.run();
        receiver.try_recv().ok().flatten()
    }

    /// Frames of a given type delivered from `from`.
    pub(crate) fn count_delivered(&self, from: SessionRole, matches: impl Fn(&Frame) -> bool) -> usize {
        self.delivered.iter().filter(|(sender, frame)| *sender == from && matches(frame)).count()
    }
}
