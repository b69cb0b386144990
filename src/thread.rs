//! Generic gen-server multi-threading pattern, adapted from the reference
//! crate's `util::thread` module: a thread owns its own state and is only
//! ever reached via a message channel, never shared memory.
//!
//! Used by [crate::persistor::IndexPersistor] to run the background flush
//! loop as a `Thread<PersistorMsg>`.

use std::{
    mem,
    sync::{mpsc, Arc, Mutex},
    thread,
};

use crate::error::{Result, StoreError};

/// A named background thread reachable only via its [Tx] handle. Dropping
/// the last handle and the [Thread] value itself joins the underlying
/// `JoinHandle`, so no routine is left dangling.
pub struct Thread<Q, R = (), T = ()> {
    name: String,
    inner: Option<Inner<Q, R, T>>,
}

struct Inner<Q, R, T> {
    handle: thread::JoinHandle<T>,
    tx: Option<Arc<Mutex<mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>>>>,
}

impl<Q, R, T> Inner<Q, R, T> {
    fn join(mut self) -> Result<T> {
        mem::drop(self.tx.take());
        self.handle
            .join()
            .map_err(|err| StoreError::InitializationError(format!("thread panicked: {:?}", err)))
    }
}

impl<Q, R, T> Drop for Thread<Q, R, T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.join().ok();
        }
    }
}

impl<Q, R, T> Thread<Q, R, T> {
    /// Spawn a new thread whose main loop is `main_loop(rx)`, called once
    /// on the new thread with the receiving half of an unbounded channel.
    pub fn new<F, N>(name: &str, main_loop: F) -> Thread<Q, R, T>
    where
        F: 'static + FnOnce(Rx<Q, R>) -> N + Send,
        N: 'static + Send + FnOnce() -> T,
        T: 'static + Send,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(main_loop(rx));
        Thread {
            name: name.to_string(),
            inner: Some(Inner {
                handle,
                tx: Some(Arc::new(Mutex::new(tx))),
            }),
        }
    }

    /// Signal shutdown and wait for the thread to exit, returning its
    /// final value. All outstanding [Tx] clones must also be dropped for
    /// this to return.
    pub fn join(mut self) -> Result<T> {
        self.inner.take().unwrap().join()
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn to_tx(&self) -> Tx<Q, R> {
        Tx(self.inner.as_ref().unwrap().tx.as_ref().unwrap().lock().unwrap().clone())
    }
}

/// Cloneable handle for posting messages to a [Thread].
pub struct Tx<Q, R = ()>(mpsc::Sender<(Q, Option<mpsc::Sender<R>>)>);

impl<Q, R> Clone for Tx<Q, R> {
    fn clone(&self) -> Self {
        Tx(self.0.clone())
    }
}

impl<Q, R> Tx<Q, R> {
    /// Post a message and don't wait for a response.
    pub fn post(&self, msg: Q) -> Result<()> {
        self.0
            .send((msg, None))
            .map_err(|_| StoreError::InitializationError("thread channel closed".to_string()))
    }

    /// Send a request and block for the response.
    pub fn request(&self, req: Q) -> Result<R> {
        let (rtx, rrx) = mpsc::channel();
        self.0
            .send((req, Some(rtx)))
            .map_err(|_| StoreError::InitializationError("thread channel closed".to_string()))?;
        rrx.recv()
            .map_err(|_| StoreError::InitializationError("thread exited before responding".to_string()))
    }
}

pub type Rx<Q, R = ()> = mpsc::Receiver<(Q, Option<mpsc::Sender<R>>)>;
