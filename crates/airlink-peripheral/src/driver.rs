use std::fmt;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::change::ChangeSet;
use crate::error::PeripheralError;

/// Queue depth for application requests and backend reports.
pub const EVENT_QUEUE: usize = 32;

/// A peripheral core owned by a single driver task.
///
/// Application requests, backend reports and rollback deadlines are all
/// applied from that task, one at a time. Each call records into `changes`;
/// the driver publishes one snapshot per call if anything was recorded.
pub trait Peripheral: Send + 'static {
    type Request: fmt::Debug + Send + 'static;
    type Report: fmt::Debug + Send + 'static;
    type Snapshot: Clone + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    fn handle_request(&mut self, request: Self::Request, now: Instant, changes: &mut ChangeSet);

    fn handle_report(&mut self, report: Self::Report, changes: &mut ChangeSet);

    fn poll_timeouts(&mut self, now: Instant, changes: &mut ChangeSet);

    /// Earliest armed rollback deadline over all settings.
    fn next_deadline(&self) -> Option<Instant>;

    fn snapshot(&self) -> Self::Snapshot;
}

/// Application side of a running peripheral.
pub struct PeripheralHandle<P: Peripheral> {
    requests: mpsc::Sender<P::Request>,
    snapshot: watch::Receiver<P::Snapshot>,
}

impl<P: Peripheral> Clone for PeripheralHandle<P> {
    fn clone(&self) -> Self {
        Self { requests: self.requests.clone(), snapshot: self.snapshot.clone() }
    }
}

impl<P: Peripheral> PeripheralHandle<P> {
    pub async fn request(&self, request: P::Request) -> Result<(), PeripheralError> {
        self.requests.send(request).await.map_err(|_| PeripheralError::Closed { peripheral: P::NAME })
    }

    pub fn snapshot(&self) -> P::Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<P::Snapshot> {
        self.snapshot.clone()
    }
}

/// Backend side: device-reported state goes in here.
pub struct Reporter<P: Peripheral> {
    reports: mpsc::Sender<P::Report>,
}

impl<P: Peripheral> Clone for Reporter<P> {
    fn clone(&self) -> Self {
        Self { reports: self.reports.clone() }
    }
}

impl<P: Peripheral> Reporter<P> {
    pub async fn report(&self, report: P::Report) -> Result<(), PeripheralError> {
        self.reports.send(report).await.map_err(|_| PeripheralError::Closed { peripheral: P::NAME })
    }
}

/// Spawns the driver task. It stops once every [`PeripheralHandle`] is
/// dropped, which tears the peripheral down.
pub fn spawn<P: Peripheral>(peripheral: P) -> (PeripheralHandle<P>, Reporter<P>, JoinHandle<()>) {
    let (req_tx, req_rx) = mpsc::channel(EVENT_QUEUE);
    let (rep_tx, rep_rx) = mpsc::channel(EVENT_QUEUE);
    let (snap_tx, snap_rx) = watch::channel(peripheral.snapshot());

    let task = tokio::spawn(drive(peripheral, req_rx, rep_rx, snap_tx));
    (
        PeripheralHandle { requests: req_tx, snapshot: snap_rx },
        Reporter { reports: rep_tx },
        task,
    )
}

async fn drive<P: Peripheral>(
    mut peripheral: P,
    mut requests: mpsc::Receiver<P::Request>,
    mut reports: mpsc::Receiver<P::Report>,
    snapshot: watch::Sender<P::Snapshot>,
) {
    let mut changes = ChangeSet::default();
    let mut backend_open = true;
    info!("peripheral {}: driver started", P::NAME);

    loop {
        let deadline = peripheral.next_deadline();
        tokio::select! {
            req = requests.recv() => match req {
                Some(req) => {
                    debug!("peripheral {}: request {:?}", P::NAME, req);
                    peripheral.handle_request(req, Instant::now(), &mut changes);
                }
                None => break,
            },
            rep = reports.recv(), if backend_open => match rep {
                Some(rep) => {
                    debug!("peripheral {}: report {:?}", P::NAME, rep);
                    peripheral.handle_report(rep, &mut changes);
                }
                None => {
                    info!("peripheral {}: backend gone", P::NAME);
                    backend_open = false;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                peripheral.poll_timeouts(Instant::now(), &mut changes);
            }
        }
        notify_updated(&peripheral, &mut changes, &snapshot);
    }

    info!("peripheral {}: driver stopped", P::NAME);
}

fn notify_updated<P: Peripheral>(peripheral: &P, changes: &mut ChangeSet, snapshot: &watch::Sender<P::Snapshot>) {
    if changes.take() {
        snapshot.send_replace(peripheral.snapshot());
    }
}
