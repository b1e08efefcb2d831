//! Client session: drives the conversation state, the call machine and the
//! cache synchronizer from the hub's frame stream.
//!
//! The session is transport-agnostic: the embedding shell feeds decoded
//! [`ServerFrame`]s in and writes the returned [`ClientFrame`]s out. UI
//! notifications leave through an unbounded event channel. All automatic
//! protocol behavior lives here -- delivery acks for pushed messages, read
//! receipts for the open thread, busy auto-rejection of a second call.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::debug;

use courant_shared::message::{Message, MessageContent};
use courant_shared::protocol::{ClientFrame, ServerFrame};
use courant_shared::types::{CallType, ConnectionId, CorrelationId, MessageId, UserId};
use courant_store::Database;

use crate::call::{CallError, CallMachine, CallState};
use crate::conversation::ConversationState;
use crate::error::Result;
use crate::events::ClientEvent;
use crate::sync::CacheSynchronizer;

pub struct ClientSession {
    me: UserId,
    connection_id: Option<ConnectionId>,
    online: Vec<UserId>,
    conversations: HashMap<UserId, ConversationState>,
    /// Thread currently on screen; pushes from this counterpart are read
    /// immediately.
    open_with: Option<UserId>,
    call: CallMachine,
    sync: CacheSynchronizer,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientSession {
    pub fn new(me: UserId, db: Database, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self {
            me,
            connection_id: None,
            online: Vec::new(),
            conversations: HashMap::new(),
            open_with: None,
            call: CallMachine::new(),
            sync: CacheSynchronizer::new(me, db),
            events,
        }
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    /// Identity of the live hub connection, once registration is acked.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn online(&self) -> &[UserId] {
        &self.online
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.online.contains(&user)
    }

    pub fn call_state(&self) -> &CallState {
        self.call.state()
    }

    pub fn conversation(&self, counterpart: UserId) -> Option<&ConversationState> {
        self.conversations.get(&counterpart)
    }

    fn conversation_mut(&mut self, counterpart: UserId) -> &mut ConversationState {
        let me = self.me;
        self.conversations
            .entry(counterpart)
            .or_insert_with(|| ConversationState::new(me, counterpart))
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::error!("event channel closed, dropping client event");
        }
    }

    /// The handshake frame the transport must send first.
    pub fn register_frame(&self) -> ClientFrame {
        ClientFrame::Register { user: self.me }
    }

    // -- user-initiated operations ------------------------------------------

    /// Open a thread: render from cache immediately, then return the frames
    /// that revalidate it (full fetch) and mark it read.
    pub fn open_conversation(&mut self, counterpart: UserId) -> Result<Vec<ClientFrame>> {
        let cached = self.sync.render(counterpart)?;
        let conv = self.conversation_mut(counterpart);
        if !cached.is_empty() {
            conv.replace_all(cached);
        }
        conv.mark_read_local(Utc::now());
        self.open_with = Some(counterpart);
        self.emit(ClientEvent::ConversationUpdated { counterpart });

        Ok(vec![
            ClientFrame::FetchConversation { counterpart },
            ClientFrame::MarkRead { counterpart },
        ])
    }

    pub fn close_conversation(&mut self) {
        self.open_with = None;
    }

    /// Submit a message. The stub is visible the instant this returns; the
    /// returned frame is the asynchronous submission.
    pub fn send_message(
        &mut self,
        counterpart: UserId,
        content: MessageContent,
        reply_to: Option<MessageId>,
    ) -> ClientFrame {
        let correlation_id = CorrelationId::new();
        self.conversation_mut(counterpart)
            .push_local(correlation_id, content.clone(), reply_to);
        self.emit(ClientEvent::ConversationUpdated { counterpart });

        ClientFrame::SendMessage {
            correlation_id,
            receiver: counterpart,
            content,
            reply_to,
        }
    }

    /// Manual retry of a failed send.
    pub fn retry_message(
        &mut self,
        counterpart: UserId,
        correlation_id: CorrelationId,
    ) -> Option<ClientFrame> {
        let (fresh, content, reply_to) = self
            .conversation_mut(counterpart)
            .retry_failed(correlation_id)?;
        self.emit(ClientEvent::ConversationUpdated { counterpart });

        Some(ClientFrame::SendMessage {
            correlation_id: fresh,
            receiver: counterpart,
            content,
            reply_to,
        })
    }

    pub fn add_reaction(&self, message_id: MessageId, emoji: String) -> ClientFrame {
        // Applied when the authoritative snapshot comes back.
        ClientFrame::AddReaction { message_id, emoji }
    }

    pub fn remove_reaction(&self, message_id: MessageId) -> ClientFrame {
        ClientFrame::RemoveReaction { message_id }
    }

    pub fn delete_message(&self, message_id: MessageId) -> ClientFrame {
        ClientFrame::DeleteMessage { message_id }
    }

    /// Explicit clear-conversation: wipes the cache and the rendered list.
    pub fn clear_conversation(&mut self, counterpart: UserId) -> Result<()> {
        self.sync.clear(counterpart)?;
        self.conversations.remove(&counterpart);
        self.emit(ClientEvent::ConversationUpdated { counterpart });
        Ok(())
    }

    pub fn start_call(
        &mut self,
        partner: UserId,
        call_type: CallType,
    ) -> std::result::Result<ClientFrame, CallError> {
        let fx = self.call.initiate(partner, call_type)?;
        self.emit(ClientEvent::CallStateChanged);
        // initiate always produces the offer frame
        fx.send.ok_or(CallError::InvalidState)
    }

    pub fn accept_call(&mut self) -> std::result::Result<ClientFrame, CallError> {
        let fx = self.call.accept()?;
        self.emit(ClientEvent::CallStateChanged);
        fx.send.ok_or(CallError::InvalidState)
    }

    pub fn reject_call(&mut self) -> std::result::Result<ClientFrame, CallError> {
        let fx = self.call.reject()?;
        self.release_media_if(fx.release_media);
        self.emit(ClientEvent::CallStateChanged);
        fx.send.ok_or(CallError::InvalidState)
    }

    /// Hang up. `None` when there was nothing to hang up (idempotent).
    pub fn end_call(&mut self) -> Option<ClientFrame> {
        let fx = self.call.end();
        self.release_media_if(fx.release_media);
        if fx.send.is_some() {
            self.emit(ClientEvent::CallStateChanged);
        }
        fx.send
    }

    /// Send an opaque negotiation payload to the active call partner.
    pub fn send_signal(&mut self, payload: Vec<u8>) -> Option<ClientFrame> {
        let partner = self.call.state().partner()?;
        self.call.on_negotiation(partner);
        Some(ClientFrame::Signal {
            target: partner,
            payload,
        })
    }

    fn release_media_if(&self, release: bool) {
        if release {
            // Capture devices and the peer connection belong to the media
            // layer; the event is its release signal.
            debug!("releasing media resources");
        }
    }

    // -- hub frame pump -----------------------------------------------------

    /// Apply one frame from the hub. Returns the frames to send back
    /// (delivery acks, read receipts, busy rejections).
    pub fn handle_frame(&mut self, frame: ServerFrame) -> Result<Vec<ClientFrame>> {
        let mut replies = Vec::new();

        match frame {
            ServerFrame::Registered { connection_id } => {
                debug!(conn = %connection_id, "registered with hub");
                self.connection_id = Some(connection_id);
            }

            ServerFrame::PresenceSnapshot { online } => {
                self.online = online.clone();
                self.emit(ClientEvent::PresenceChanged { online });
            }

            ServerFrame::MessageAccepted {
                correlation_id,
                message,
            } => {
                let counterpart = self.other_party(&message);
                self.conversation_mut(counterpart)
                    .resolve_submission(correlation_id, message);
                self.emit(ClientEvent::ConversationUpdated { counterpart });
            }

            ServerFrame::SendFailed {
                correlation_id,
                reason,
            } => {
                let mut updated = None;
                for conv in self.conversations.values_mut() {
                    if conv.submission_failed(correlation_id) {
                        updated = Some(conv.counterpart());
                        break;
                    }
                }
                if let Some(counterpart) = updated {
                    self.emit(ClientEvent::ConversationUpdated { counterpart });
                }
                self.emit(ClientEvent::SendFailed {
                    correlation_id,
                    reason,
                });
            }

            ServerFrame::MessagePushed { message } => {
                let counterpart = self.other_party(&message);
                let message_id = message.id;
                let applied = self.conversation_mut(counterpart).apply_push(message);

                // Confirm the push either way; the hub's status advance is
                // monotonic, so a re-ack after a replay is harmless.
                replies.push(ClientFrame::AckDelivered { message_id });

                if applied {
                    if self.open_with == Some(counterpart) {
                        self.conversation_mut(counterpart).mark_read_local(Utc::now());
                        replies.push(ClientFrame::MarkRead { counterpart });
                    }
                    self.emit(ClientEvent::ConversationUpdated { counterpart });
                }
            }

            ServerFrame::MessageDelivered { message_id, at } => {
                let mut updated = None;
                for conv in self.conversations.values_mut() {
                    if conv.apply_delivered(message_id, at) {
                        updated = Some(conv.counterpart());
                        break;
                    }
                }
                if let Some(counterpart) = updated {
                    self.emit(ClientEvent::ConversationUpdated { counterpart });
                }
            }

            ServerFrame::MessagesRead { read_by, at } => {
                let read = self
                    .conversations
                    .get_mut(&read_by)
                    .map(|conv| conv.apply_read_receipt(at))
                    .unwrap_or(0);
                if read > 0 {
                    self.emit(ClientEvent::ConversationUpdated {
                        counterpart: read_by,
                    });
                }
            }

            ServerFrame::ReactionUpdated {
                message_id,
                reactions,
            } => {
                let mut updated = None;
                for conv in self.conversations.values_mut() {
                    if conv.apply_reaction_snapshot(message_id, reactions.clone()) {
                        updated = Some(conv.counterpart());
                        break;
                    }
                }
                if let Some(counterpart) = updated {
                    self.emit(ClientEvent::ConversationUpdated { counterpart });
                }
            }

            ServerFrame::MessageDeleted { message_id, .. } => {
                let mut updated = None;
                for conv in self.conversations.values_mut() {
                    if conv.apply_deleted(message_id) {
                        updated = Some(conv.counterpart());
                        break;
                    }
                }
                if let Some(counterpart) = updated {
                    self.emit(ClientEvent::ConversationUpdated { counterpart });
                }
            }

            ServerFrame::ConversationSnapshot {
                counterpart,
                messages,
            } => {
                self.conversation_mut(counterpart)
                    .replace_all(messages.clone());
                self.sync.commit(counterpart, &messages)?;
                self.emit(ClientEvent::ConversationUpdated { counterpart });
            }

            ServerFrame::CallIncoming { caller, call_type } => {
                let fx = self.call.on_incoming(caller, call_type);
                match fx.send {
                    // Busy: the auto-reply goes out, our session stands.
                    Some(reject) => replies.push(reject),
                    None => {
                        self.emit(ClientEvent::IncomingCall { caller, call_type });
                        self.emit(ClientEvent::CallStateChanged);
                    }
                }
            }

            ServerFrame::CallAccepted { by } => {
                self.call.on_accepted(by);
                self.emit(ClientEvent::CallStateChanged);
            }

            ServerFrame::CallRejected { by, reason } => {
                let fx = self.call.on_rejected(by, &reason);
                self.release_media_if(fx.release_media);
                self.emit(ClientEvent::CallStateChanged);
            }

            ServerFrame::CallEnded { by } => {
                let fx = self.call.on_ended(by);
                self.release_media_if(fx.release_media);
                if fx.release_media {
                    self.emit(ClientEvent::CallStateChanged);
                }
            }

            ServerFrame::Signal { from, payload } => {
                self.call.on_negotiation(from);
                self.emit(ClientEvent::CallSignal { from, payload });
            }
        }

        Ok(replies)
    }

    fn other_party(&self, message: &Message) -> UserId {
        if message.sender == self.me {
            message.receiver
        } else {
            message.sender
        }
    }
}
