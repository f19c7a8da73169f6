use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use flume::{RecvError, Selector, TryRecvError, TrySendError};
use log::{trace, warn};
use nalgebra::Vector3;
use thiserror::Error;

use crate::{calibration::CalibrationEvent, pipeline::OutputFrame, utils::capacity::Capacity};

use super::{Message, Status};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("Trying to read from an empty stream")]
    Empty,

    #[error("Trying to read from a closed stream")]
    Closed,
}

#[derive(Debug, Default)]
struct SinkShared {
    dropped: AtomicU64,
    queue_full_signal: AtomicBool,
}

/// Producer side of the output stream. Cloned by the pipeline (data frames)
/// and the calibration engine (status and axis messages).
///
/// Data frames go through a channel bounded by the sink capacity. Status and
/// axis messages use their own unbounded channel, so a slow consumer only
/// loses frames and never a calibration result.
#[derive(Debug, Clone)]
pub struct MessageSink {
    frames: flume::Sender<Message>,
    control: flume::Sender<Message>,
    shared: Arc<SinkShared>,
}

/// Consumer side of the output stream. Pending status and axis messages are
/// delivered before queued data frames.
#[derive(Debug)]
pub struct MessageStream {
    frames: flume::Receiver<Message>,
    control: flume::Receiver<Message>,
    shared: Arc<SinkShared>,
}

pub fn sink(capacity: Capacity) -> (MessageSink, MessageStream) {
    let (frames_tx, frames_rx) = capacity.channel();
    let (control_tx, control_rx) = Capacity::Unbounded.channel();
    let shared = Arc::new(SinkShared::default());

    (
        MessageSink {
            frames: frames_tx,
            control: control_tx,
            shared: shared.clone(),
        },
        MessageStream {
            frames: frames_rx,
            control: control_rx,
            shared,
        },
    )
}

impl MessageSink {
    /// Never blocks. When the frame queue is full the frame is dropped and
    /// the queue full signal is raised.
    pub fn send(&self, msg: Message) {
        let tx = match msg {
            Message::Data(_) => &self.frames,
            Message::Status { .. } | Message::Axis { .. } => &self.control,
        };

        match tx.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);

                if !self.shared.queue_full_signal.swap(true, Ordering::SeqCst) {
                    warn!("Output stream full, dropping frames until the consumer catches up");
                }
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("Output stream has no consumer, message discarded");
            }
        }
    }

    pub fn data(&self, frame: OutputFrame) {
        self.send(Message::Data(frame));
    }

    pub fn status(&self, ev: CalibrationEvent) {
        self.send(ev.into());
    }

    pub fn text(&self, text: impl Into<String>) {
        self.send(Message::Status {
            status: Status::Text(text.into()),
        });
    }

    pub fn axis(&self, axis: &Vector3<f64>) {
        self.send(Message::Axis {
            dominant_axis: [axis.x, axis.y, axis.z],
        });
    }
}

impl MessageStream {
    pub fn recv(&self) -> Result<Message, StreamError> {
        match self.try_recv() {
            Err(StreamError::Empty) => {}
            other => return other,
        }

        let selected = Selector::new()
            .recv(&self.control, |r| r)
            .recv(&self.frames, |r| r)
            .wait();

        self.selected(selected)
    }

    pub fn try_recv(&self) -> Result<Message, StreamError> {
        if let Ok(msg) = self.control.try_recv() {
            return Ok(msg);
        }

        // Both channels share their senders, so they disconnect together
        self.frames.try_recv().map_err(|e| match e {
            TryRecvError::Empty => StreamError::Empty,
            TryRecvError::Disconnected => StreamError::Closed,
        })
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Message, StreamError> {
        match self.try_recv() {
            Err(StreamError::Empty) => {}
            other => return other,
        }

        match Selector::new()
            .recv(&self.control, |r| r)
            .recv(&self.frames, |r| r)
            .wait_timeout(timeout)
        {
            Ok(selected) => self.selected(selected),
            Err(_) => Err(StreamError::Empty),
        }
    }

    fn selected(&self, selected: Result<Message, RecvError>) -> Result<Message, StreamError> {
        match selected {
            Ok(msg) => Ok(msg),
            // Disconnected, drain what the other channel still holds
            Err(RecvError::Disconnected) => self.try_recv(),
        }
    }

    /// Number of frames dropped because the stream was full
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn queue_full_signaled(&self) -> bool {
        self.shared.queue_full_signal.load(Ordering::SeqCst)
    }

    pub fn clear_queue_full_signal(&self) {
        self.shared.queue_full_signal.store(false, Ordering::SeqCst);
    }
}
