pub mod fanout;
pub mod identity;
pub mod registry;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use courier_db::Database;

pub use fanout::Fanout;
pub use identity::{IdentityVerifier, JwtIdentity};
pub use registry::{ConnectionRegistry, Outbound, SessionHandle};
pub use session::{SessionState, handle_session};

/// Everything a live session needs, constructed once at startup and cloned
/// into each upgrade handler.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub registry: ConnectionRegistry,
    pub fanout: Fanout,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub heartbeat: Duration,
}

impl Gateway {
    pub fn new(
        db: Arc<Database>,
        registry: ConnectionRegistry,
        verifier: Arc<dyn IdentityVerifier>,
        heartbeat: Duration,
    ) -> Self {
        let fanout = Fanout::new(db.clone(), registry.clone());
        Self {
            db,
            registry,
            fanout,
            verifier,
            heartbeat,
        }
    }
}
