// Copyright (c) The labrat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::TestRunnerBuildError;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread,
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::oneshot,
    task::JoinHandle,
};
use tracing::{debug, warn};

/// Timer primitives captured when the engine starts.
///
/// Timers are driven by a dedicated thread running its own runtime. Units run on a separate
/// execution runtime, so a test that pauses, advances or otherwise stubs out the execution
/// runtime's clock cannot affect the engine's own timeout enforcement.
///
/// `Timers` is cheap to clone. The timer thread shuts down once the last clone is dropped.
#[derive(Clone, Debug)]
pub struct Timers {
    driver: Arc<TimerDriver>,
}

impl Timers {
    /// Starts the timer thread and captures a handle to it.
    pub fn capture() -> Result<Self, TestRunnerBuildError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .thread_name("labrat-timers")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("labrat-timers".to_owned())
            .spawn(move || {
                // block_on drives spawned timer tasks until shutdown is requested.
                runtime.block_on(async move {
                    _ = shutdown_rx.await;
                });
                debug!("timer thread exiting");
            })
            .map_err(TestRunnerBuildError::TimerThreadSpawn)?;

        Ok(Self {
            driver: Arc::new(TimerDriver {
                handle,
                shutdown_tx: Some(shutdown_tx),
                thread: Some(thread),
            }),
        })
    }

    /// Returns a future that resolves after `duration` of real time has elapsed.
    pub fn sleep(&self, duration: Duration) -> TimerSleep {
        let (tx, rx) = oneshot::channel();
        let task = self.driver.handle.spawn(async move {
            tokio::time::sleep(duration).await;
            _ = tx.send(());
        });
        TimerSleep { rx, task }
    }
}

#[derive(Debug)]
struct TimerDriver {
    handle: Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Drop for TimerDriver {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            _ = shutdown_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("timer thread panicked during shutdown");
            }
        }
    }
}

/// A sleep driven by [`Timers`]. Dropping it cancels the underlying timer.
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct TimerSleep {
    rx: oneshot::Receiver<()>,
    task: JoinHandle<()>,
}

impl Future for TimerSleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // The timer thread went away, so the sleep can never fire. Expire now rather than
            // leave the unit without a timeout.
            Poll::Ready(Err(_)) => {
                warn!("timer thread exited before the timer fired, expiring it early");
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TimerSleep {
    fn drop(&mut self) {
        self.task.abort();
    }
}
