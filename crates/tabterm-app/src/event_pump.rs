//! Drains the shell host's event channel into the output router.
//!
//! The pump runs on its own OS thread so routing never competes with the
//! control loop. Delivery into sessions happens under the router lock, which
//! is what makes unsubscribe a hard barrier for late output.

use std::io;
use std::thread::JoinHandle;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use tabterm_pty::{HostEvent, OutputRouter};

/// A running event pump. Stop it with [`stop`](Self::stop); dropping it
/// stops it too.
pub struct EventPump {
    stop_tx: mpsc::Sender<()>,
    thread: Option<JoinHandle<usize>>,
}

/// Start routing `events` on a dedicated thread.
pub fn start_event_pump(
    runtime: &Handle,
    router: OutputRouter,
    events: mpsc::UnboundedReceiver<HostEvent>,
) -> io::Result<EventPump> {
    let (stop_tx, stop_rx) = mpsc::channel::<()>(1);
    let runtime = runtime.clone();
    let thread = std::thread::Builder::new()
        .name("event-pump".to_string())
        .spawn(move || runtime.block_on(pump_loop(router, events, stop_rx)))?;

    Ok(EventPump {
        stop_tx,
        thread: Some(thread),
    })
}

impl EventPump {
    /// Signal the pump and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(());
        match thread.join() {
            Ok(routed) => log::debug!("Event pump stopped after {routed} events"),
            Err(_) => log::warn!("Event pump thread panicked"),
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Route events until stopped or until every host event sender is gone.
/// Returns the number of events delivered to a subscriber.
async fn pump_loop(
    router: OutputRouter,
    mut events: mpsc::UnboundedReceiver<HostEvent>,
    mut stop_rx: mpsc::Receiver<()>,
) -> usize {
    let mut routed = 0;
    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => return routed,
            event = events.recv() => match event {
                Some(event) => {
                    if router.handle_event(event) {
                        routed += 1;
                    }
                }
                None => {
                    log::info!("Shell host closed its event channel");
                    return routed;
                }
            },
        }
    }
}
