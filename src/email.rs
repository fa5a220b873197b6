//! EmailGateway (C5): outbound email is an external collaborator per the
//! spec's non-goals. This trait exists so [`crate::verification`] and the
//! registration handler have somewhere to hand a code without depending on
//! a concrete transport; the default implementation just logs.

use tracing::info;

pub trait EmailGateway: Send + Sync {
    fn send_verification_code(&self, email: &str, code: &str);
    fn send_welcome(&self, email: &str, username: &str);
}

/// Fire-and-forget logger, standing in for SMTP delivery.
pub struct NoopEmailGateway;

impl EmailGateway for NoopEmailGateway {
    fn send_verification_code(&self, email: &str, code: &str) {
        info!(%email, %code, "verification code issued");
    }

    fn send_welcome(&self, email: &str, username: &str) {
        info!(%email, %username, "welcome email queued");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_gateway_does_not_panic() {
        let gw = NoopEmailGateway;
        gw.send_verification_code("a@x.com", "123456");
        gw.send_welcome("a@x.com", "alice");
    }
}
