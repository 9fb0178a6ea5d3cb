//! Walks through a resumption against `echo_server`:
//!
//! 1. connects with a resume token and requests a stream of 10 items
//! 2. drops the transport once ENTER is pressed and requests a second stream while offline
//! 3. dials a new connection on the next ENTER and resumes, the second stream then flows
//! 4. closes the session on the last ENTER

use std::io::{self, BufRead};

use micro_rsocket::frame::{Payload, SetupPayload};
use micro_rsocket::handler::{Subscriber, Subscription};
use micro_rsocket::protocol::StreamError;
use micro_rsocket::resume::ResumeToken;
use micro_rsocket::session::{ResumeOutcome, Session};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const ADDRESS: &str = "127.0.0.1:7878";

/// Logs every item, pulling them two at a time.
struct Print {
    name: &'static str,
    subscription: Option<Box<dyn Subscription>>,
}

impl Print {
    fn new(name: &'static str) -> Self {
        Self { name, subscription: None }
    }
}

impl Subscriber for Print {
    fn on_subscribe(&mut self, mut subscription: Box<dyn Subscription>) {
        subscription.request(2);
        self.subscription = Some(subscription);
    }

    fn on_next(&mut self, payload: Payload) {
        info!(stream = self.name, item = %String::from_utf8_lossy(payload.data()), "next");
        if let Some(subscription) = self.subscription.as_mut() {
            subscription.request(1);
        }
    }

    fn on_complete(&mut self) {
        info!(stream = self.name, "complete");
    }

    fn on_error(&mut self, error: StreamError) {
        warn!(stream = self.name, %error, "error");
    }
}

async fn wait_for_enter(prompt: &str) {
    println!("{prompt}");
    let _ = tokio::task::spawn_blocking(|| io::stdin().lock().read_line(&mut String::new())).await;
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let session = Session::builder().build();
    let setup = SetupPayload::builder().mime_types("text/plain", "text/plain").resume_token(ResumeToken::generate()).build();

    if let Err(e) = micro_rsocket_tcp::connect(ADDRESS, &session, setup).await {
        error!(cause = %e, "failed to connect");
        return;
    }

    if let Err(e) = session.request_stream(Payload::from("10"), Print::new("first")) {
        error!(cause = %e, "failed to request the first stream");
    }
    wait_for_enter("press ENTER to drop the connection").await;

    if let Err(e) = session.disconnect() {
        error!(cause = %e, "failed to disconnect");
    }
    if let Err(e) = session.request_stream(Payload::from("10"), Print::new("second")) {
        error!(cause = %e, "failed to request the second stream");
    }
    wait_for_enter("press ENTER to resume").await;

    match micro_rsocket_tcp::resume(ADDRESS, &session).await {
        Ok(ResumeOutcome::Resumed) => info!("resume ok"),
        Ok(ResumeOutcome::Rejected(rejection)) => warn!(%rejection, "resume rejected"),
        Ok(ResumeOutcome::ConnectionError(cause)) => warn!(%cause, "connection failed during resume"),
        Err(e) => error!(cause = %e, "failed to reach the server"),
    }
    wait_for_enter("press ENTER to close the session").await;

    session.close();
}
