// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The per-connection inbound dispatch loop.
//!
//! Exactly one loop reads the inbound channel of a connection, so frames
//! are classified strictly in arrival order and no two frames ever race for
//! the same pending entry.

use crate::connection::Shared;
use crate::protocol::Protocol;
use plcwire_core::InboundEvent;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Spawns the dispatch loop for a connection.
pub(crate) fn spawn<P: Protocol>(
    shared: Weak<Shared<P>>,
    rx: mpsc::Receiver<InboundEvent>,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, rx))
}

async fn run<P: Protocol>(shared: Weak<Shared<P>>, mut rx: mpsc::Receiver<InboundEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(connection) = shared.upgrade() else {
            break;
        };
        match event {
            InboundEvent::Frame(bytes) => {
                trace!(bytes = bytes.len(), "inbound frame");
                connection.handle_frame(&bytes);
            }
            InboundEvent::Closed { reason } => {
                connection.shutdown(reason.as_deref().unwrap_or("transport closed"));
                break;
            }
        }
    }

    // Every sink was dropped without a close notice.
    if let Some(connection) = shared.upgrade() {
        connection.shutdown("inbound channel ended");
    }
    debug!("dispatch loop stopped");
}
