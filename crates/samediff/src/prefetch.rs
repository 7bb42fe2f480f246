//! Background prefetch over any iterator.
//!
//! A producer thread pulls items ahead of the consumer through a bounded
//! channel. Producer panics are caught per item and re-raised on the
//! consumer side, so a failure in data loading surfaces where the data is
//! used.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{sync_channel, Receiver};
use std::thread::JoinHandle;

enum Message<T> {
    Item(T),
    End,
    Failed(String),
}

/// Wraps an iterator so `next` runs ahead on a worker thread, buffering up
/// to `capacity` items.
pub struct AsyncPrefetchIterator<T: Send + 'static> {
    rx: Option<Receiver<Message<T>>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> AsyncPrefetchIterator<T> {
    pub fn new<I>(inner: I, capacity: usize) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        let (tx, rx) = sync_channel(capacity.max(1));
        let handle = std::thread::spawn(move || {
            let mut inner = inner;
            loop {
                let step = catch_unwind(AssertUnwindSafe(|| inner.next()));
                let message = match step {
                    Ok(Some(item)) => Message::Item(item),
                    Ok(None) => Message::End,
                    Err(payload) => Message::Failed(panic_text(payload)),
                };
                let stop = matches!(message, Message::End | Message::Failed(_));
                // A send error means the consumer is gone; just stop.
                if tx.send(message).is_err() || stop {
                    break;
                }
            }
        });
        AsyncPrefetchIterator {
            rx: Some(rx),
            handle: Some(handle),
        }
    }
}

impl<T: Send + 'static> Iterator for AsyncPrefetchIterator<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let rx = self.rx.as_ref()?;
        match rx.recv() {
            Ok(Message::Item(item)) => Some(item),
            Ok(Message::End) => {
                self.rx = None;
                None
            }
            Ok(Message::Failed(reason)) => {
                self.rx = None;
                panic!("prefetch producer panicked: {reason}");
            }
            // Producer thread died without a sentinel.
            Err(_) => {
                self.rx = None;
                panic!("prefetch producer disconnected unexpectedly");
            }
        }
    }
}

impl<T: Send + 'static> Drop for AsyncPrefetchIterator<T> {
    fn drop(&mut self) {
        // Closing the channel unblocks a producer stuck on send.
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
