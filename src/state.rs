//! AppState: the shared handle every connection task and background
//! worker clones. Construction happens once at startup in `main.rs` and
//! the collaborators are injected rather than reached for as globals
//! (spec: "construct these once at startup and pass them as dependencies").

use std::sync::Arc;

use sqlx::PgPool;

use crate::email::EmailGateway;
use crate::hot_store::HotStore;
use crate::messaging::MessagingCore;
use crate::session::SessionRegistry;
use crate::verification::VerificationCodeService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub hot: HotStore,
    pub messaging: MessagingCore,
    pub sessions: Arc<SessionRegistry>,
    pub verification: Arc<VerificationCodeService>,
    pub email: Arc<dyn EmailGateway>,
}

impl AppState {
    pub fn new(pool: PgPool, hot: HotStore, email: Arc<dyn EmailGateway>) -> Self {
        let messaging = MessagingCore::new(hot.clone(), pool.clone());
        Self {
            pool,
            hot,
            messaging,
            sessions: Arc::new(SessionRegistry::new()),
            verification: Arc::new(VerificationCodeService::new()),
            email,
        }
    }
}
