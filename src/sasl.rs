//! SASL negotiation.
//!
//! The connection reactor feeds inbound SASL bodies to [`SaslClient`]
//! and writes whatever it asks to send. Mechanisms are pluggable behind
//! [`SaslMechanism`]; `PLAIN`, `ANONYMOUS`, and `EXTERNAL` ship with the
//! crate.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    error::{AmqpError, SaslFailure},
    performative::{SaslBody, SaslInit, SaslOutcome},
    types::Symbol,
};

/// One SASL mechanism, driven by the negotiation loop.
pub trait SaslMechanism: Send + Sync {
    /// Mechanism name as advertised by servers, e.g. `PLAIN`.
    fn name(&self) -> &str;

    /// Payload for the `sasl-init` frame.
    fn initial_response(&self) -> Option<Bytes>;

    /// Answer a server challenge. Single-step mechanisms refuse.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError::Sasl`] when the mechanism cannot answer.
    fn respond(&self, _challenge: &Bytes) -> Result<Bytes, AmqpError> {
        Err(AmqpError::sasl(format!(
            "mechanism {} received an unexpected challenge",
            self.name()
        )))
    }
}

/// `PLAIN`: authorization-id NUL authentication-id NUL password.
pub struct Plain {
    username: String,
    password: String,
}

impl Plain {
    /// Authenticate with the given credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &str { "PLAIN" }

    fn initial_response(&self) -> Option<Bytes> {
        let mut payload = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        payload.push(0);
        payload.extend_from_slice(self.username.as_bytes());
        payload.push(0);
        payload.extend_from_slice(self.password.as_bytes());
        Some(Bytes::from(payload))
    }
}

/// `ANONYMOUS`: no credentials.
pub struct Anonymous;

impl SaslMechanism for Anonymous {
    fn name(&self) -> &str { "ANONYMOUS" }

    fn initial_response(&self) -> Option<Bytes> { Some(Bytes::new()) }
}

/// `EXTERNAL`: identity established by the transport layer.
pub struct External;

impl SaslMechanism for External {
    fn name(&self) -> &str { "EXTERNAL" }

    fn initial_response(&self) -> Option<Bytes> { Some(Bytes::new()) }
}

/// What the driver wants done after consuming an inbound body.
#[derive(Clone, Debug)]
pub enum SaslStep {
    /// Write this body and keep negotiating.
    Send(SaslBody),
    /// Negotiation succeeded; re-send the AMQP header.
    Done,
}

enum SaslState {
    AwaitingMechanisms,
    Negotiating,
    Finished,
}

/// Client side of the sasl-init / challenge / response / outcome exchange.
pub struct SaslClient {
    mechanisms: Vec<Arc<dyn SaslMechanism>>,
    hostname: Option<String>,
    active: Option<Arc<dyn SaslMechanism>>,
    state: SaslState,
}

impl SaslClient {
    /// A client preferring `mechanisms` in the given order.
    #[must_use]
    pub fn new(mechanisms: Vec<Arc<dyn SaslMechanism>>, hostname: Option<String>) -> Self {
        Self {
            mechanisms,
            hostname,
            active: None,
            state: SaslState::AwaitingMechanisms,
        }
    }

    /// Consume one inbound SASL body and decide the next step.
    ///
    /// # Errors
    ///
    /// Returns [`AmqpError::Sasl`] when no mutual mechanism exists, the
    /// outcome reports failure, or the server violates the exchange.
    pub fn on_frame(&mut self, body: &SaslBody) -> Result<SaslStep, AmqpError> {
        match (&self.state, body) {
            (SaslState::AwaitingMechanisms, SaslBody::Mechanisms(offered)) => {
                let chosen = self
                    .mechanisms
                    .iter()
                    .find(|mechanism| {
                        offered
                            .mechanisms
                            .iter()
                            .any(|symbol| symbol.as_str() == mechanism.name())
                    })
                    .cloned();
                let Some(mechanism) = chosen else {
                    warn!(
                        "no mutual sasl mechanism: server offered {:?}",
                        offered
                            .mechanisms
                            .iter()
                            .map(Symbol::as_str)
                            .collect::<Vec<_>>()
                    );
                    return Err(AmqpError::sasl("no mutual mechanism"));
                };
                debug!("sasl mechanism selected: {}", mechanism.name());
                let init = SaslInit {
                    mechanism: Symbol::new(mechanism.name()),
                    initial_response: mechanism.initial_response(),
                    hostname: self.hostname.clone(),
                };
                self.active = Some(mechanism);
                self.state = SaslState::Negotiating;
                Ok(SaslStep::Send(SaslBody::Init(init)))
            }
            (SaslState::Negotiating, SaslBody::Challenge(challenge)) => {
                let mechanism = self
                    .active
                    .as_ref()
                    .ok_or_else(|| AmqpError::sasl("challenge before init"))?;
                let response = mechanism.respond(challenge)?;
                Ok(SaslStep::Send(SaslBody::Response(response)))
            }
            (SaslState::Negotiating, SaslBody::Outcome(outcome)) => self.on_outcome(outcome),
            (_, body) => Err(AmqpError::sasl(format!(
                "unexpected {} during sasl negotiation",
                body.name()
            ))),
        }
    }

    fn on_outcome(&mut self, outcome: &SaslOutcome) -> Result<SaslStep, AmqpError> {
        if outcome.code == 0 {
            debug!("sasl negotiation complete");
            self.state = SaslState::Finished;
            return Ok(SaslStep::Done);
        }
        let kind = SaslFailure::from_code(outcome.code);
        Err(AmqpError::Sasl {
            kind,
            description: format!(
                "server rejected sasl negotiation with code {}",
                outcome.code
            ),
        })
    }
}
