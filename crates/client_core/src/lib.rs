use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Weak},
};

use shared::{
    domain::{Chat, ChatId, PendingImage, ServerTime, UserProfile},
    protocol::HealthResponse,
};
use tokio::{
    sync::{broadcast, Mutex},
    time,
};
use tracing::{debug, info, warn};

pub mod classifier;
pub mod error;
pub mod gate;
pub mod profile;
pub mod scheduler;
pub mod send;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use classifier::{Classification, HttpImageClassifier, ImageClassifier, LookupImageClassifier};
pub use error::{ClientError, ClientResult};
pub use profile::{FileProfileStore, MemoryProfileStore, ProfileStore, PROFILE_KEY};
pub use scheduler::LoopHandle;
pub use send::{Draft, SendOutcome, SendRejection};
pub use store::{FailedSend, FailedSendId};
pub use sync::{ChatSync, SyncPhase, SyncSettings};
pub use transport::{ChatBackend, HttpChatBackend};
pub use types::{ClientEvent, GateOutcome, PollReport};

use gate::{GateDecision, SensitiveContentGate};
use send::SendPipeline;
use store::ChatStore;

const MIN_USERNAME_LEN: usize = 3;
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct ClientState {
    username: Option<String>,
    store: ChatStore,
    syncs: HashMap<ChatId, AttachedSync>,
    next_epoch: u64,
    sends: SendPipeline,
    gate: SensitiveContentGate,
}

// Poll results only count against the attach that issued them.
struct AttachedSync {
    epoch: u64,
    sync: ChatSync,
}

impl ClientState {
    fn reset(&mut self, username: Option<String>) {
        self.username = username;
        self.store.clear();
        self.syncs.clear();
        self.sends.clear();
        self.gate.clear();
    }

    fn require_chat(&self, chat_id: &ChatId) -> ClientResult<String> {
        let username = self.username.clone().ok_or(ClientError::NotLoggedIn)?;
        if !self.store.contains_chat(chat_id) {
            return Err(ClientError::UnknownChat(chat_id.clone()));
        }
        Ok(username)
    }
}

struct ActivePoller {
    chat_id: ChatId,
    handle: LoopHandle,
}

/// Client-side message synchronization engine for one signed-in user.
pub struct ChatClient {
    backend: Arc<dyn ChatBackend>,
    classifier: Arc<dyn ImageClassifier>,
    profiles: Arc<dyn ProfileStore>,
    settings: SyncSettings,
    inner: Mutex<ClientState>,
    poller: Mutex<Option<ActivePoller>>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(backend: Arc<dyn ChatBackend>, settings: SyncSettings) -> Arc<Self> {
        Self::new_with_dependencies(
            backend,
            Arc::new(LookupImageClassifier::new()),
            Arc::new(MemoryProfileStore::new()),
            settings,
        )
    }

    pub fn new_with_dependencies(
        backend: Arc<dyn ChatBackend>,
        classifier: Arc<dyn ImageClassifier>,
        profiles: Arc<dyn ProfileStore>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            backend,
            classifier,
            profiles,
            settings,
            inner: Mutex::new(ClientState {
                username: None,
                store: ChatStore::new(),
                syncs: HashMap::new(),
                next_epoch: 0,
                sends: SendPipeline::new(),
                gate: SensitiveContentGate::new(),
            }),
            poller: Mutex::new(None),
            events,
        })
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn report_persistent(&self, err: &ClientError) {
        if !err.is_transient() {
            self.emit(ClientEvent::Error(err.to_string()));
        }
    }

    async fn bounded<T>(&self, call: impl Future<Output = ClientResult<T>>) -> ClientResult<T> {
        match time::timeout(self.settings.request_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.settings.request_timeout)),
        }
    }

    async fn session_user(&self) -> ClientResult<String> {
        self.inner
            .lock()
            .await
            .username
            .clone()
            .ok_or(ClientError::NotLoggedIn)
    }

    pub async fn current_user(&self) -> Option<String> {
        self.inner.lock().await.username.clone()
    }

    pub async fn health(&self) -> ClientResult<HealthResponse> {
        self.bounded(self.backend.health()).await
    }

    async fn begin_session(&self, username: String) {
        self.close_chat().await;
        self.inner.lock().await.reset(Some(username));
    }

    fn remember_user(&self, username: &str) -> ClientResult<()> {
        self.profiles
            .set(PROFILE_KEY, username)
            .map_err(ClientError::Profile)
    }

    pub async fn register(&self, username: &str) -> ClientResult<UserProfile> {
        let username = username.trim();
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(ClientError::Validation(format!(
                "username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }

        let profile = self.bounded(self.backend.register_user(username)).await?;
        self.remember_user(&profile.username)?;
        self.begin_session(profile.username.clone()).await;
        info!(username = %profile.username, "session: registered");
        Ok(profile)
    }

    pub async fn sign_in(&self, username: &str) -> ClientResult<UserProfile> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ClientError::Validation("username must not be empty".to_string()));
        }

        let profile = self.bounded(self.backend.get_user_profile(username)).await?;
        self.remember_user(&profile.username)?;
        self.begin_session(profile.username.clone()).await;
        info!(username = %profile.username, "session: signed in");
        self.refresh_chats().await?;
        Ok(profile)
    }

    pub async fn resume(&self) -> ClientResult<Option<UserProfile>> {
        let stored = self
            .profiles
            .get(PROFILE_KEY)
            .map_err(ClientError::Profile)?;
        match stored {
            Some(username) => self.sign_in(&username).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn search_users(&self, query: &str) -> ClientResult<Vec<UserProfile>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ClientError::Validation(
                "search query must not be empty".to_string(),
            ));
        }
        let current_user = self.session_user().await?;
        self.bounded(self.backend.search_users(query, &current_user))
            .await
    }

    pub async fn start_chat(&self, counterpart: &str) -> ClientResult<ChatId> {
        let counterpart = counterpart.trim();
        let current_user = self.session_user().await?;
        if counterpart.is_empty() || counterpart == current_user {
            return Err(ClientError::Validation(
                "pick someone else to chat with".to_string(),
            ));
        }

        let chat = self
            .bounded(self.backend.create_chat(&current_user, counterpart))
            .await?;
        let chat_id = chat.id.clone();
        self.inner.lock().await.store.upsert_chat(chat);
        info!(chat_id = %chat_id, counterpart, "session: chat started");
        self.emit(ClientEvent::ChatUpdated {
            chat_id: chat_id.clone(),
            appended: 0,
        });
        Ok(chat_id)
    }

    pub async fn refresh_chats(&self) -> ClientResult<usize> {
        let current_user = self.session_user().await?;
        let chats = match self
            .bounded(self.backend.get_user_chats(&current_user))
            .await
        {
            Ok(chats) => chats,
            Err(err) => {
                warn!(username = %current_user, error = %err, "refresh: chat list fetch failed");
                self.report_persistent(&err);
                return Err(err);
            }
        };

        let count = chats.len();
        {
            let mut guard = self.inner.lock().await;
            if guard.username.as_deref() != Some(current_user.as_str()) {
                debug!("refresh: session changed, dropping stale chat list");
                return Ok(count);
            }
            guard.store.merge_chat_list(chats);
        }
        debug!(chats = count, "refresh: chat list merged");
        self.emit(ClientEvent::ChatListRefreshed { chats: count });
        Ok(count)
    }

    pub fn spawn_list_refresher(self: &Arc<Self>) -> LoopHandle {
        let client = Arc::downgrade(self);
        LoopHandle::spawn(
            "chat-list-refresh",
            self.settings.list_refresh_interval,
            move || {
                let client = Weak::clone(&client);
                async move {
                    if let Some(client) = client.upgrade() {
                        let _ = client.refresh_chats().await;
                    }
                }
            },
        )
    }

    pub async fn list_chats(&self) -> Vec<Chat> {
        self.inner.lock().await.store.list_chats()
    }

    pub async fn chat(&self, chat_id: &ChatId) -> Option<Chat> {
        self.inner.lock().await.store.chat(chat_id).cloned()
    }

    pub async fn mark_read(&self, chat_id: &ChatId) -> bool {
        self.inner.lock().await.store.mark_read(chat_id)
    }

    pub async fn set_unread_count(&self, chat_id: &ChatId, unread: u32) -> bool {
        self.inner
            .lock()
            .await
            .store
            .set_unread_count(chat_id, unread)
    }

    pub async fn sync_state(&self, chat_id: &ChatId) -> Option<ChatSync> {
        self.inner
            .lock()
            .await
            .syncs
            .get(chat_id)
            .map(|attached| attached.sync.clone())
    }

    pub async fn active_chat(&self) -> Option<ChatId> {
        self.poller
            .lock()
            .await
            .as_ref()
            .map(|active| active.chat_id.clone())
    }

    /// Installs a fresh synchronizer for `chat_id` without starting a timer;
    /// the caller drives it with [`ChatClient::poll_once`].
    pub async fn attach_chat(&self, chat_id: &ChatId) -> ClientResult<()> {
        let mut guard = self.inner.lock().await;
        guard.require_chat(chat_id)?;
        let seed = guard
            .store
            .latest_timestamp(chat_id)
            .unwrap_or(ServerTime::ZERO);
        guard.next_epoch += 1;
        let epoch = guard.next_epoch;
        guard.syncs.insert(
            chat_id.clone(),
            AttachedSync {
                epoch,
                sync: ChatSync::new(seed, self.settings.warm_up_cycles),
            },
        );
        debug!(chat_id = %chat_id, %seed, epoch, "sync: attached");
        Ok(())
    }

    /// Makes `chat_id` the open chat and starts polling it. A previously open
    /// chat is closed first.
    pub async fn open_chat(self: &Arc<Self>, chat_id: &ChatId) -> ClientResult<()> {
        self.close_chat().await;
        self.attach_chat(chat_id).await?;

        let client = Arc::downgrade(self);
        let tick_chat = chat_id.clone();
        let handle = LoopHandle::spawn("message-poll", self.settings.poll_interval, move || {
            let client = Weak::clone(&client);
            let chat_id = tick_chat.clone();
            async move {
                if let Some(client) = client.upgrade() {
                    let _ = client.poll_once(&chat_id).await;
                }
            }
        });

        let previous = self.poller.lock().await.replace(ActivePoller {
            chat_id: chat_id.clone(),
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.stop();
        }
        info!(chat_id = %chat_id, "sync: chat opened");
        Ok(())
    }

    pub async fn close_chat(&self) -> Option<ChatId> {
        let active = self.poller.lock().await.take()?;
        active.handle.stop();
        self.inner.lock().await.syncs.remove(&active.chat_id);
        info!(chat_id = %active.chat_id, "sync: chat closed");
        Some(active.chat_id)
    }

    pub async fn poll_once(&self, chat_id: &ChatId) -> ClientResult<PollReport> {
        let (epoch, since) = {
            let guard = self.inner.lock().await;
            let attached = guard
                .syncs
                .get(chat_id)
                .ok_or_else(|| ClientError::ChatNotOpen(chat_id.clone()))?;
            (attached.epoch, attached.sync.fetch_since())
        };

        let raw = match self
            .bounded(self.backend.get_messages_since(chat_id, since))
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(chat_id = %chat_id, %since, error = %err, "sync: poll failed, retrying on next tick");
                self.report_persistent(&err);
                return Err(err);
            }
        };

        let report = {
            let mut guard = self.inner.lock().await;
            let state = &mut *guard;
            let appended = state
                .store
                .apply_reconciled_messages(chat_id, raw.iter().cloned())
                .unwrap_or(0);
            let cursor = match state.syncs.get_mut(chat_id) {
                Some(attached) if attached.epoch == epoch => {
                    attached.sync.on_poll_success(&raw);
                    attached.sync.cursor()
                }
                Some(attached) => {
                    debug!(chat_id = %chat_id, epoch, current = attached.epoch, "sync: stale poll result, cycle not counted");
                    attached.sync.cursor()
                }
                None => since,
            };
            PollReport {
                since,
                fetched: raw.len(),
                appended,
                cursor,
            }
        };

        if report.appended > 0 {
            debug!(
                chat_id = %chat_id,
                since = %report.since,
                fetched = report.fetched,
                appended = report.appended,
                cursor = %report.cursor,
                "sync: poll applied"
            );
            self.emit(ClientEvent::ChatUpdated {
                chat_id: chat_id.clone(),
                appended: report.appended,
            });
        }
        Ok(report)
    }

    pub async fn is_sending(&self, chat_id: &ChatId) -> bool {
        self.inner.lock().await.sends.is_in_flight(chat_id)
    }

    pub async fn send(&self, chat_id: &ChatId, draft: Draft) -> ClientResult<SendOutcome> {
        if draft.is_empty() {
            return Ok(SendOutcome::Rejected(SendRejection::EmptyDraft));
        }

        let sender = {
            let mut guard = self.inner.lock().await;
            let sender = guard.require_chat(chat_id)?;
            if !guard.sends.begin(chat_id) {
                debug!(chat_id = %chat_id, "send: rejected, previous send still in flight");
                return Ok(SendOutcome::Rejected(SendRejection::InFlight));
            }
            sender
        };

        let result = self
            .bounded(self.backend.send_message(
                chat_id,
                draft.content.trim(),
                &sender,
                draft.image_ref.as_deref(),
            ))
            .await;

        let mut guard = self.inner.lock().await;
        guard.sends.finish(chat_id);
        match result {
            Ok(message) => {
                let state = &mut *guard;
                let appended = state
                    .store
                    .apply_reconciled_messages(chat_id, [message.clone()])
                    .unwrap_or(0);
                if let Some(attached) = state.syncs.get_mut(chat_id) {
                    attached.sync.on_send_confirmed(message.timestamp);
                }
                drop(guard);

                info!(
                    chat_id = %chat_id,
                    message_id = %message.id,
                    timestamp = %message.timestamp,
                    image = message.has_image(),
                    "send: delivered"
                );
                self.emit(ClientEvent::ChatUpdated {
                    chat_id: chat_id.clone(),
                    appended,
                });
                Ok(SendOutcome::Delivered(message))
            }
            Err(err) => {
                let reason = err.to_string();
                let failed_id = guard
                    .store
                    .record_failed_send(chat_id, draft.clone(), reason.clone());
                drop(guard);

                warn!(chat_id = %chat_id, failed_id, error = %reason, "send: failed, draft restored");
                self.emit(ClientEvent::SendFailed {
                    chat_id: chat_id.clone(),
                    failed_id,
                    reason,
                });
                Ok(SendOutcome::Failed { draft, failed_id })
            }
        }
    }

    pub async fn failed_sends(&self, chat_id: &ChatId) -> Vec<FailedSend> {
        self.inner.lock().await.store.failed_sends(chat_id).to_vec()
    }

    /// Resends a failed draft. `None` when no such failed send exists.
    pub async fn retry_failed(
        &self,
        chat_id: &ChatId,
        failed_id: FailedSendId,
    ) -> ClientResult<Option<SendOutcome>> {
        let failed = {
            let mut guard = self.inner.lock().await;
            if guard.sends.is_in_flight(chat_id) {
                return Ok(Some(SendOutcome::Rejected(SendRejection::InFlight)));
            }
            match guard.store.take_failed_send(chat_id, failed_id) {
                Some(failed) => failed,
                None => return Ok(None),
            }
        };

        let outcome = self.send(chat_id, failed.draft.clone()).await?;
        if let SendOutcome::Rejected(SendRejection::InFlight) = outcome {
            self.inner
                .lock()
                .await
                .store
                .record_failed_send(chat_id, failed.draft, failed.reason);
        }
        Ok(Some(outcome))
    }

    pub async fn discard_failed(&self, chat_id: &ChatId, failed_id: FailedSendId) -> bool {
        self.inner
            .lock()
            .await
            .store
            .take_failed_send(chat_id, failed_id)
            .is_some()
    }

    /// Routes an image through the sensitive-content gate. Clear images are
    /// sent right away; flagged ones wait for [`ChatClient::confirm_pending`]
    /// or [`ChatClient::cancel_pending`]. A failing classifier counts as clear.
    pub async fn submit_image(&self, chat_id: &ChatId, image_ref: &str) -> ClientResult<GateOutcome> {
        let image_ref = image_ref.trim();
        if image_ref.is_empty() {
            return Err(ClientError::Validation(
                "image reference must not be empty".to_string(),
            ));
        }

        {
            let mut guard = self.inner.lock().await;
            guard.require_chat(chat_id)?;
            if !guard.gate.begin(chat_id, image_ref) {
                debug!(chat_id = %chat_id, "gate: busy");
                return Ok(GateOutcome::Busy);
            }
        }

        let timeout = self.settings.request_timeout;
        let classification = match time::timeout(timeout, self.classifier.classify(image_ref)).await
        {
            Ok(Ok(classification)) => Some(classification),
            Ok(Err(err)) => {
                warn!(chat_id = %chat_id, error = %err, "gate: classification failed, sending without confirmation");
                None
            }
            Err(_) => {
                warn!(chat_id = %chat_id, ?timeout, "gate: classification timed out, sending without confirmation");
                None
            }
        };

        let decision = self
            .inner
            .lock()
            .await
            .gate
            .resolve(chat_id, classification);
        match decision {
            Some(GateDecision::Forward(image_ref)) => {
                let outcome = self.send(chat_id, Draft::image(image_ref)).await?;
                Ok(GateOutcome::Sent(outcome))
            }
            Some(GateDecision::AwaitConfirmation(pending)) => {
                info!(
                    chat_id = %chat_id,
                    regions = pending.regions.len(),
                    "gate: image flagged, awaiting confirmation"
                );
                self.emit(ClientEvent::ImageFlagged {
                    chat_id: chat_id.clone(),
                    pending: pending.clone(),
                });
                Ok(GateOutcome::AwaitingConfirmation(pending))
            }
            None => Ok(GateOutcome::Busy),
        }
    }

    pub async fn pending_image(&self, chat_id: &ChatId) -> Option<PendingImage> {
        self.inner.lock().await.gate.pending(chat_id).cloned()
    }

    pub async fn confirm_pending(&self, chat_id: &ChatId) -> ClientResult<Option<SendOutcome>> {
        let pending = self.inner.lock().await.gate.take_pending(chat_id);
        let Some(pending) = pending else {
            return Ok(None);
        };
        info!(chat_id = %chat_id, "gate: flagged image confirmed");
        self.send(chat_id, Draft::image(pending.image_ref))
            .await
            .map(Some)
    }

    pub async fn cancel_pending(&self, chat_id: &ChatId) -> bool {
        let cancelled = self.inner.lock().await.gate.cancel(chat_id);
        if cancelled {
            info!(chat_id = %chat_id, "gate: flagged image cancelled");
        }
        cancelled
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
