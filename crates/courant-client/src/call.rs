//! Call signaling state machine.
//!
//! One machine per user; at most one non-idle session at a time. Each
//! transition returns the effects the embedding session must carry out:
//! a frame to send to the hub and/or releasing held media resources.
//! Negotiation payloads (SDP/ICE or anything else) are opaque; the machine
//! only tracks where the handshake stands.

use thiserror::Error;
use tracing::debug;

use courant_shared::protocol::{CallRejectReason, ClientFrame};
use courant_shared::types::{CallType, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// We rang `partner` and wait for their answer.
    Outgoing { partner: UserId, call_type: CallType },
    /// `partner` is ringing us.
    Incoming { partner: UserId, call_type: CallType },
    /// Both sides agreed; negotiation in progress.
    Connecting { partner: UserId, call_type: CallType },
    Connected { partner: UserId, call_type: CallType },
}

impl CallState {
    pub fn is_idle(&self) -> bool {
        matches!(self, CallState::Idle)
    }

    pub fn partner(&self) -> Option<UserId> {
        match self {
            CallState::Idle => None,
            CallState::Outgoing { partner, .. }
            | CallState::Incoming { partner, .. }
            | CallState::Connecting { partner, .. }
            | CallState::Connected { partner, .. } => Some(*partner),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("A call session is already active")]
    NotIdle,

    #[error("No session in a state that allows this operation")]
    InvalidState,
}

/// What the embedding session must do after a transition.
#[derive(Debug, Default)]
pub struct CallEffects {
    /// Frame to send to the hub, if any.
    pub send: Option<ClientFrame>,
    /// Entering idle releases capture devices and the peer connection,
    /// regardless of which state the session came from.
    pub release_media: bool,
}

pub struct CallMachine {
    state: CallState,
}

impl CallMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Ring a partner. Caller only; rejected unless idle.
    pub fn initiate(&mut self, partner: UserId, call_type: CallType) -> Result<CallEffects, CallError> {
        if !self.state.is_idle() {
            return Err(CallError::NotIdle);
        }
        debug!(partner = %partner.short(), call_type = ?call_type, "initiating call");
        self.state = CallState::Outgoing { partner, call_type };
        Ok(CallEffects {
            send: Some(ClientFrame::CallInitiate {
                receiver: partner,
                call_type,
            }),
            release_media: false,
        })
    }

    /// A call offer arrived. If we are idle it rings; otherwise the caller
    /// gets an automatic busy reply and our own session is untouched.
    pub fn on_incoming(&mut self, caller: UserId, call_type: CallType) -> CallEffects {
        if !self.state.is_idle() {
            debug!(caller = %caller.short(), "busy, auto-rejecting offer");
            return CallEffects {
                send: Some(ClientFrame::CallReject {
                    caller,
                    reason: CallRejectReason::Busy,
                }),
                release_media: false,
            };
        }

        self.state = CallState::Incoming {
            partner: caller,
            call_type,
        };
        CallEffects::default()
    }

    /// Accept the ringing offer; notifies the caller.
    pub fn accept(&mut self) -> Result<CallEffects, CallError> {
        match self.state.clone() {
            CallState::Incoming { partner, call_type } => {
                self.state = CallState::Connecting { partner, call_type };
                Ok(CallEffects {
                    send: Some(ClientFrame::CallAccept { caller: partner }),
                    release_media: false,
                })
            }
            _ => Err(CallError::InvalidState),
        }
    }

    /// Decline the ringing offer; notifies the caller with the reason.
    pub fn reject(&mut self) -> Result<CallEffects, CallError> {
        match self.state.clone() {
            CallState::Incoming { partner, .. } => {
                self.state = CallState::Idle;
                Ok(CallEffects {
                    send: Some(ClientFrame::CallReject {
                        caller: partner,
                        reason: CallRejectReason::Declined,
                    }),
                    release_media: true,
                })
            }
            _ => Err(CallError::InvalidState),
        }
    }

    /// The partner accepted our outgoing offer.
    pub fn on_accepted(&mut self, by: UserId) -> CallEffects {
        match self.state.clone() {
            CallState::Outgoing { partner, call_type } if partner == by => {
                self.state = CallState::Connecting { partner, call_type };
            }
            _ => debug!(by = %by.short(), "acceptance without matching outgoing session ignored"),
        }
        CallEffects::default()
    }

    /// The partner declined (or was busy/unreachable); surfaced to us only.
    pub fn on_rejected(&mut self, by: UserId, reason: &CallRejectReason) -> CallEffects {
        match self.state.clone() {
            CallState::Outgoing { partner, .. } if partner == by => {
                debug!(by = %by.short(), reason = ?reason, "call rejected");
                self.state = CallState::Idle;
                CallEffects {
                    send: None,
                    release_media: true,
                }
            }
            _ => CallEffects::default(),
        }
    }

    /// A negotiation message moved through (either direction). The
    /// handshake is live, so `Connecting` graduates to `Connected`.
    pub fn on_negotiation(&mut self, with: UserId) {
        if let CallState::Connecting { partner, call_type } = self.state.clone() {
            if partner == with {
                self.state = CallState::Connected { partner, call_type };
            }
        }
    }

    /// Hang up locally. Idempotent and immediate from any state; on an
    /// already-idle machine it is a no-op, not an error.
    pub fn end(&mut self) -> CallEffects {
        match self.state.partner() {
            None => CallEffects::default(),
            Some(partner) => {
                self.state = CallState::Idle;
                CallEffects {
                    send: Some(ClientFrame::CallEnd {
                        counterpart: partner,
                    }),
                    release_media: true,
                }
            }
        }
    }

    /// The partner hung up. Exactly one idle transition per session; a
    /// replayed notification finds the machine idle and does nothing.
    pub fn on_ended(&mut self, by: UserId) -> CallEffects {
        if self.state.partner() == Some(by) {
            self.state = CallState::Idle;
            CallEffects {
                send: None,
                release_media: true,
            }
        } else {
            CallEffects::default()
        }
    }
}

impl Default for CallMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_happy_path() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();

        let fx = machine.initiate(bob, CallType::Video).unwrap();
        assert!(matches!(fx.send, Some(ClientFrame::CallInitiate { .. })));
        assert!(matches!(machine.state(), CallState::Outgoing { .. }));

        machine.on_accepted(bob);
        assert!(matches!(machine.state(), CallState::Connecting { .. }));

        machine.on_negotiation(bob);
        assert!(matches!(machine.state(), CallState::Connected { .. }));

        let fx = machine.end();
        assert!(matches!(fx.send, Some(ClientFrame::CallEnd { .. })));
        assert!(fx.release_media);
        assert!(machine.state().is_idle());
    }

    #[test]
    fn test_receiver_accept_path() {
        let mut machine = CallMachine::new();
        let alice = UserId::new();

        let fx = machine.on_incoming(alice, CallType::Audio);
        assert!(fx.send.is_none());
        assert!(matches!(machine.state(), CallState::Incoming { .. }));

        let fx = machine.accept().unwrap();
        assert!(matches!(fx.send, Some(ClientFrame::CallAccept { .. })));
        assert!(matches!(machine.state(), CallState::Connecting { .. }));
    }

    #[test]
    fn test_reject_notifies_and_releases() {
        let mut machine = CallMachine::new();
        machine.on_incoming(UserId::new(), CallType::Audio);

        let fx = machine.reject().unwrap();
        assert!(matches!(
            fx.send,
            Some(ClientFrame::CallReject {
                reason: CallRejectReason::Declined,
                ..
            })
        ));
        assert!(fx.release_media);
        assert!(machine.state().is_idle());
    }

    #[test]
    fn test_busy_auto_reject_preserves_session() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();
        let carol = UserId::new();

        machine.initiate(bob, CallType::Video).unwrap();
        machine.on_accepted(bob);
        assert!(matches!(machine.state(), CallState::Connecting { .. }));

        // Carol rings while we negotiate with Bob.
        let fx = machine.on_incoming(carol, CallType::Audio);
        match fx.send {
            Some(ClientFrame::CallReject { caller, reason }) => {
                assert_eq!(caller, carol);
                assert_eq!(reason, CallRejectReason::Busy);
            }
            other => panic!("expected busy reject, got {other:?}"),
        }
        // The session with Bob is unaffected.
        assert_eq!(machine.state().partner(), Some(bob));
        assert!(matches!(machine.state(), CallState::Connecting { .. }));
    }

    #[test]
    fn test_initiate_refused_when_not_idle() {
        let mut machine = CallMachine::new();
        machine.initiate(UserId::new(), CallType::Audio).unwrap();
        assert_eq!(
            machine.initiate(UserId::new(), CallType::Audio).unwrap_err(),
            CallError::NotIdle
        );
    }

    #[test]
    fn test_rejection_surfaces_to_caller_and_idles() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();
        machine.initiate(bob, CallType::Audio).unwrap();

        let fx = machine.on_rejected(bob, &CallRejectReason::Busy);
        assert!(fx.release_media);
        assert!(machine.state().is_idle());
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();
        machine.initiate(bob, CallType::Audio).unwrap();

        let fx = machine.end();
        assert!(fx.send.is_some());

        // Second hangup on an idle machine: no frame, no release.
        let fx = machine.end();
        assert!(fx.send.is_none());
        assert!(!fx.release_media);
    }

    #[test]
    fn test_partner_ended_exactly_once() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();
        machine.initiate(bob, CallType::Video).unwrap();
        machine.on_accepted(bob);

        let fx = machine.on_ended(bob);
        assert!(fx.release_media);
        assert!(machine.state().is_idle());

        // Replayed notification: nothing left to release.
        let fx = machine.on_ended(bob);
        assert!(!fx.release_media);
    }

    #[test]
    fn test_stray_events_from_other_users_ignored() {
        let mut machine = CallMachine::new();
        let bob = UserId::new();
        machine.initiate(bob, CallType::Audio).unwrap();

        machine.on_accepted(UserId::new());
        assert!(matches!(machine.state(), CallState::Outgoing { .. }));

        let fx = machine.on_ended(UserId::new());
        assert!(!fx.release_media);
        assert!(!machine.state().is_idle());
    }
}
