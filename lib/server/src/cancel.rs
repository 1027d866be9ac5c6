//! A cancellation token standing in for the original single cancellation
//! token object: dropping the source's sender disconnects every cloned
//! receiver at once, which every long-running loop treats as "cancelled".

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

#[derive(Clone)]
pub struct CancelToken {
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

pub struct CancelSource {
    _tx: Sender<()>,
    token: CancelToken,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        CancelSource {
            _tx: tx,
            token: CancelToken { rx },
        }
    }

    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}
