use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Trailing-edge debouncer. Bursts of pushed values collapse into one call of
/// `commit` with the last value, fired once `quiet` has elapsed since the last push.
///
/// Dropping or cancelling discards a pending value instead of flushing it.
pub struct Debouncer<T> {
    sender: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn spawn<F, Fut>(quiet: Duration, commit: F) -> Self
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(receiver, quiet, commit));
        Self { sender, task }
    }

    /// Returns false once the debouncer has been cancelled.
    pub fn push(&self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<T, F, Fut>(mut receiver: mpsc::UnboundedReceiver<T>, quiet: Duration, mut commit: F)
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(mut pending) = receiver.recv().await {
        loop {
            tokio::select! {
                next = receiver.recv() => match next {
                    Some(value) => pending = value,
                    None => return,
                },
                _ = tokio::time::sleep(quiet) => break,
            }
        }
        commit(pending).await;
    }
}
