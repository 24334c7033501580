use std::{future::Future, time::Duration};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::debug;

/// A fixed-interval timer loop. Every tick runs as its own task, so a slow
/// tick never delays or cancels the next one, and stopping the loop never
/// cancels a tick that is already running.
pub struct LoopHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub fn spawn<F, Fut>(name: &'static str, period: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stopped.changed() => break,
                    _ = interval.tick() => {}
                }
                if *stopped.borrow() {
                    break;
                }
                tokio::spawn(tick());
            }
            debug!(loop_name = name, "scheduler: loop stopped");
        });
        Self { stop, task }
    }

    /// No further ticks are scheduled after this returns.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
