//! Serves two routes on 127.0.0.1:7878:
//! request/response echoes its payload back, request/stream for "n" counts from 1 to n.
//!
//! Sessions opened with a resume token can be resumed by `resume_client`.

use micro_rsocket::connection::SessionAcceptor;
use micro_rsocket::frame::{Payload, SetupPayload};
use micro_rsocket::handler::{RequestHandler, StreamSink, Subscriber, SubscriberFactory, Subscription};
use micro_rsocket::protocol::HandlerError;
use micro_rsocket_tcp::Server;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

struct Demo;

/// Emits one payload on the first request.
struct Once {
    sink: StreamSink,
    payload: Option<Payload>,
}

impl Subscription for Once {
    fn request(&mut self, _n: u32) {
        if let Some(payload) = self.payload.take() {
            self.sink.on_next(payload);
        }
    }

    fn cancel(&mut self) {
        self.payload = None;
    }
}

/// Emits "1" to `count` as credit arrives, then completes.
struct Count {
    sink: StreamSink,
    next: u64,
    count: u64,
}

impl Subscription for Count {
    fn request(&mut self, n: u32) {
        for _ in 0..n {
            if self.next > self.count {
                break;
            }
            self.sink.on_next(Payload::from(self.next.to_string()));
            self.next += 1;
        }
        if self.next > self.count {
            self.sink.on_complete();
        }
    }

    fn cancel(&mut self) {
        info!(emitted = self.next - 1, "stream canceled");
        self.count = 0;
    }
}

impl RequestHandler for Demo {
    fn handle_setup(&mut self, setup: &SetupPayload) -> Result<(), HandlerError> {
        info!(resumable = setup.is_resumable(), data_mime_type = setup.data_mime_type(), "new session");
        Ok(())
    }

    fn handle_request_response(&mut self, request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        let once = Once { sink: factory.create_subscriber(), payload: Some(request) };
        factory.create_subscriber().on_subscribe(Box::new(once));
        Ok(())
    }

    fn handle_request_stream(&mut self, request: Payload, factory: SubscriberFactory) -> Result<(), HandlerError> {
        let count = std::str::from_utf8(request.data())?.trim().parse()?;
        info!(stream_id = %factory.stream_id(), count, "counting");
        let counter = Count { sink: factory.create_subscriber(), next: 1, count };
        factory.create_subscriber().on_subscribe(Box::new(counter));
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    info!(port = 7878, "start listening");

    let acceptor = SessionAcceptor::builder().handler_factory(|_setup: &SetupPayload| Box::new(Demo) as Box<dyn RequestHandler>).build();

    let server = match Server::builder().address("127.0.0.1:7878").acceptor(acceptor).build().await {
        Ok(server) => server,
        Err(e) => {
            error!(cause = %e, "failed to build server");
            return;
        }
    };

    if let Err(e) = server.start().await {
        error!(cause = %e, "server stopped");
    }
}
