//! Outbound delivery boundary.
//!
//! The chat client lives outside this process. [`Notifier`] is the seam it
//! plugs into; [`StdoutNotifier`] writes one JSON line per delivery.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use ccrelay_engine::{AlertAction, DeliveryAction, Outbound, Update};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One unit of outbound work queued by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Update(Outbound),
    Alert { window_id: String, action: AlertAction },
}

pub trait Notifier: Send + Sync {
    fn send(&self, window_id: &str, delivery_id: u64, update: &Update) -> io::Result<()>;
    fn edit_previous(&self, window_id: &str, target: u64, update: &Update) -> io::Result<()>;
    fn alert(&self, window_id: &str, action: &AlertAction) -> io::Result<()>;
}

pub fn deliver(notifier: &dyn Notifier, delivery: &Delivery) -> io::Result<()> {
    match delivery {
        Delivery::Update(out) => match out.action {
            DeliveryAction::Send => notifier.send(&out.window_id, out.delivery_id, &out.update),
            DeliveryAction::Edit { target } => {
                notifier.edit_previous(&out.window_id, target, &out.update)
            }
        },
        Delivery::Alert { window_id, action } => notifier.alert(window_id, action),
    }
}

/// Drain the delivery channel until it closes or shutdown is requested.
pub async fn run_delivery(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::Receiver<Delivery>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            next = rx.recv() => {
                let Some(delivery) = next else { break };
                if let Err(e) = deliver(notifier.as_ref(), &delivery) {
                    warn!(error = %e, "delivery failed");
                }
            }
        }
    }
    // Flush whatever was queued before shutdown.
    while let Ok(delivery) = rx.try_recv() {
        if let Err(e) = deliver(notifier.as_ref(), &delivery) {
            debug!(error = %e, "delivery during shutdown failed");
        }
    }
}

// ─── Stdout ──────────────────────────────────────────────────────

/// Writes JSON lines to any writer; stdout by default.
pub struct StdoutNotifier<W = io::Stdout> {
    out: Mutex<W>,
}

impl StdoutNotifier {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> StdoutNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_line(&self, value: &Value) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("notifier writer poisoned"))?;
        serde_json::to_writer(&mut *out, value)?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

impl<W: Write + Send> Notifier for StdoutNotifier<W> {
    fn send(&self, window_id: &str, delivery_id: u64, update: &Update) -> io::Result<()> {
        self.write_line(&json!({
            "op": "send",
            "window_id": window_id,
            "delivery_id": delivery_id,
            "update": update,
        }))
    }

    fn edit_previous(&self, window_id: &str, target: u64, update: &Update) -> io::Result<()> {
        self.write_line(&json!({
            "op": "edit",
            "window_id": window_id,
            "target": target,
            "update": update,
        }))
    }

    fn alert(&self, window_id: &str, action: &AlertAction) -> io::Result<()> {
        let mut body = match action {
            AlertAction::Raise {
                pane_id,
                prompt,
                prompt_hash,
            } => json!({
                "op": "alert",
                "pane_id": pane_id,
                "name": prompt.name,
                "content": prompt.content,
                "hash": prompt_hash,
            }),
            AlertAction::Dismiss {
                pane_id,
                notification_ref,
            } => json!({"op": "dismiss", "pane_id": pane_id, "ref": notification_ref}),
            AlertAction::Remove {
                pane_id,
                notification_ref,
            } => json!({"op": "remove", "pane_id": pane_id, "ref": notification_ref}),
        };
        body["window_id"] = Value::from(window_id);
        self.write_line(&body)
    }
}
