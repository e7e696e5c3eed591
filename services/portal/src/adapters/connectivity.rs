//! services/portal/src/adapters/connectivity.rs
//!
//! A connectivity flag flipped by whoever observes the network (the UI shell,
//! an OS hook, a test).

use clinic_portal_core::ports::Connectivity;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

#[derive(Debug)]
pub struct NetworkStatus {
    online: AtomicBool,
}

impl NetworkStatus {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!(online, "Connectivity changed");
        }
    }
}

impl Connectivity for NetworkStatus {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
