//! Initiator client connection (C7): an outbound connection that survives
//! local `close_socket` calls so the underlying fd stays usable once the
//! handshake hands it off to the reversed traffic direction.

use std::sync::atomic::{AtomicBool, Ordering};

use logger::Logger;

use crate::custodial::InitiatorIoHandle;

pub struct InitiatorClientConnection {
    handle: InitiatorIoHandle,
    marked_for_closure: AtomicBool,
    logger: Logger,
}

impl InitiatorClientConnection {
    pub fn new(handle: InitiatorIoHandle, logger: Logger) -> Self {
        InitiatorClientConnection {
            handle,
            marked_for_closure: AtomicBool::new(false),
            logger,
        }
    }

    pub fn io_handle(&self) -> &InitiatorIoHandle {
        &self.handle
    }

    pub fn marked_for_closure(&self) -> bool {
        self.marked_for_closure.load(Ordering::SeqCst)
    }

    /// No-op override: logs the request and flips `marked_for_closure`
    /// instead of releasing the socket, so the fd survives the caller's
    /// normal connection-teardown path.
    pub fn close_socket(&self, reason: &str) {
        self.marked_for_closure.store(true, Ordering::SeqCst);
        self.logger.debug(
            &format!("close_socket suppressed, connection marked for closure (reason: {reason})"),
            "initiator_client_connection",
            "",
        );
    }
}

impl Drop for InitiatorClientConnection {
    fn drop(&mut self) {
        self.logger.debug(
            "initiator client connection dropped, fd ownership stays with the custodial handle",
            "initiator_client_connection",
            "",
        );
    }
}
