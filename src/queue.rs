use crate::error::Error;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use std::{fmt, str::FromStr};
use tracing::trace;

/// What a full queue does with the next buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub(crate) enum Leaky {
    /// Block the producer until there is room.
    #[default]
    No,
    /// Drop the incoming buffer.
    Upstream,
    /// Drop the oldest queued buffer to make room.
    Downstream,
}

impl fmt::Display for Leaky {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::No => "no",
            Self::Upstream => "upstream",
            Self::Downstream => "downstream",
        })
    }
}

impl FromStr for Leaky {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" | "0" => Ok(Self::No),
            "upstream" | "1" => Ok(Self::Upstream),
            "downstream" | "2" => Ok(Self::Downstream),
            _ => Err(Error::UnknownLeaky(s.to_owned())),
        }
    }
}

/// Producer half of a bounded stage queue.
pub(crate) struct QueueSender<T> {
    name: &'static str,
    tx: Sender<T>,
    // only kept for `Leaky::Downstream`, to evict the oldest buffer
    evict: Option<Receiver<T>>,
    leaky: Leaky,
    dropped: u64,
}

/// Create a queue holding at most `capacity` buffers.
pub(crate) fn bounded<T>(
    name: &'static str,
    capacity: usize,
    leaky: Leaky,
) -> (QueueSender<T>, Receiver<T>) {
    let (tx, rx) = channel::bounded(capacity.max(1));
    let evict = match leaky {
        Leaky::Downstream => Some(rx.clone()),
        Leaky::No | Leaky::Upstream => None,
    };
    (
        QueueSender {
            name,
            tx,
            evict,
            leaky,
            dropped: 0,
        },
        rx,
    )
}

impl<T> QueueSender<T> {
    pub(crate) fn push(&mut self, item: T) -> Result<(), Error> {
        match self.leaky {
            Leaky::No => self
                .tx
                .send(item)
                .map_err(|_| Error::Disconnected(self.name)),
            Leaky::Upstream => match self.tx.try_send(item) {
                Ok(()) => Ok(()),
                Err(TrySendError::Full(_)) => {
                    self.dropped += 1;
                    trace!(message = "dropped incoming buffer", queue = self.name);
                    Ok(())
                }
                Err(TrySendError::Disconnected(_)) => Err(Error::Disconnected(self.name)),
            },
            Leaky::Downstream => {
                let mut item = item;
                loop {
                    match self.tx.try_send(item) {
                        Ok(()) => return Ok(()),
                        Err(TrySendError::Full(back)) => {
                            item = back;
                            if let Some(Ok(_)) = self.evict.as_ref().map(Receiver::try_recv) {
                                self.dropped += 1;
                                trace!(message = "dropped oldest buffer", queue = self.name);
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(Error::Disconnected(self.name))
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    /// Number of buffers discarded by the leaky policy so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn len(&self) -> usize {
        self.tx.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.tx.is_full()
    }
}
