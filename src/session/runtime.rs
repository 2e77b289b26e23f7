use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::llm::{GenerationFailure, HeadshotGenerator};
use crate::session::controller::{Completion, GenerationRequest, SessionController, SessionError};
use crate::state::{SessionSnapshot, UploadedImage};
use crate::utils::timing::log_generation_timing;

const COMMAND_QUEUE_CAPACITY: usize = 32;
const EVENT_QUEUE_CAPACITY: usize = 64;

/// Notable moments in a session, for displays that want more than snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Dispatched { token: u64, style_id: String },
    Completed { token: u64, completion: Completion },
}

enum SessionCommand {
    Upload {
        image: UploadedImage,
        reply: oneshot::Sender<()>,
    },
    Generate {
        style_id: String,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

struct GenerationFinished {
    token: u64,
    outcome: Result<String, GenerationFailure>,
}

/// Cloneable front end to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshots: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub async fn upload(&self, image: UploadedImage) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Upload { image, reply }).await?;
        response.await.map_err(|_| SessionError::RuntimeClosed)
    }

    /// Dispatches a generation and returns its token without waiting for
    /// the generator.
    pub async fn generate(&self, style_id: &str) -> Result<u64, SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Generate {
            style_id: style_id.to_string(),
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::RuntimeClosed)?
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.send(SessionCommand::Reset { reply }).await?;
        response.await.map_err(|_| SessionError::RuntimeClosed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn wait_until_idle(&self) -> Result<SessionSnapshot, SessionError> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(|snapshot| !snapshot.is_generating)
            .await
            .map_err(|_| SessionError::RuntimeClosed)?;
        Ok(snapshot.clone())
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(SessionCommand::Shutdown).await;
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::RuntimeClosed)
    }
}

/// Owns the controller and processes one event at a time.
pub struct SessionRuntime {
    controller: SessionController,
    generator: Arc<dyn HeadshotGenerator>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    completions: mpsc::Sender<GenerationFinished>,
}

impl SessionRuntime {
    pub fn spawn(generator: Arc<dyn HeadshotGenerator>) -> SessionHandle {
        let controller = SessionController::new();
        let (command_sender, command_receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (completion_sender, completion_receiver) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (snapshot_sender, snapshot_receiver) = watch::channel(controller.snapshot());
        let (event_sender, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);

        let runtime = SessionRuntime {
            controller,
            generator,
            snapshots: snapshot_sender,
            events: event_sender.clone(),
            completions: completion_sender,
        };
        tokio::spawn(runtime.run(command_receiver, completion_receiver));
        info!("Session runtime started");

        SessionHandle {
            commands: command_sender,
            snapshots: snapshot_receiver,
            events: event_sender,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut completions: mpsc::Receiver<GenerationFinished>,
    ) {
        loop {
            tokio::select! {
                biased;
                Some(finished) = completions.recv() => self.handle_completion(finished),
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
            }
        }
        info!("Session runtime stopped");
    }

    fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Upload { image, reply } => {
                self.controller.upload(image);
                self.publish();
                let _ = reply.send(());
            }
            SessionCommand::Generate { style_id, reply } => {
                let result = self.controller.generate(&style_id);
                self.publish();
                let result = result.map(|request| {
                    let token = request.token;
                    self.emit(SessionEvent::Dispatched {
                        token,
                        style_id: request.style.id.to_string(),
                    });
                    self.dispatch(request);
                    token
                });
                let _ = reply.send(result);
            }
            SessionCommand::Reset { reply } => {
                self.controller.reset();
                self.publish();
                let _ = reply.send(());
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn handle_completion(&mut self, finished: GenerationFinished) {
        let completion = self.controller.complete(finished.token, finished.outcome);
        if completion == Completion::Applied {
            self.publish();
        } else {
            info!("Ignored late result for token={}", finished.token);
        }
        self.emit(SessionEvent::Completed {
            token: finished.token,
            completion,
        });
    }

    fn dispatch(&self, request: GenerationRequest) {
        let generator = Arc::clone(&self.generator);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let GenerationRequest {
                token,
                style,
                image,
            } = request;
            let outcome = log_generation_timing(
                generator.provider(),
                generator.model(),
                style.id,
                token,
                || generator.generate_headshot(&image, style.prompt),
            )
            .await;
            if completions
                .send(GenerationFinished { token, outcome })
                .await
                .is_err()
            {
                warn!("Session runtime gone before generation token={} finished", token);
            }
        });
    }

    fn publish(&self) {
        self.snapshots.send_replace(self.controller.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.receiver_count() > 0 && self.events.send(event).is_err() {
            error!("Failed to broadcast session event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;
    use crate::session::controller::MISSING_IMAGE_MESSAGE;
    use crate::state::{SessionPhase, SessionState};

    type Outcome = Result<String, GenerationFailure>;

    /// Generator whose calls block until the test releases an outcome.
    struct ScriptedGenerator {
        outcomes: tokio::sync::Mutex<mpsc::UnboundedReceiver<Outcome>>,
        calls: AtomicUsize,
        instructions: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<Outcome>) {
            let (sender, receiver) = mpsc::unbounded_channel();
            let generator = Arc::new(Self {
                outcomes: tokio::sync::Mutex::new(receiver),
                calls: AtomicUsize::new(0),
                instructions: Mutex::new(Vec::new()),
            });
            (generator, sender)
        }
    }

    #[async_trait]
    impl HeadshotGenerator for ScriptedGenerator {
        fn provider(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn generate_headshot(
            &self,
            _image: &UploadedImage,
            instructions: &str,
        ) -> Result<String, GenerationFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.instructions
                .lock()
                .unwrap()
                .push(instructions.to_string());
            let mut outcomes = self.outcomes.lock().await;
            outcomes
                .recv()
                .await
                .unwrap_or_else(|| Err(GenerationFailure::new("script closed")))
        }
    }

    fn image_a() -> UploadedImage {
        UploadedImage::new(vec![7; 16], "image/png".to_string(), Some("a.png".to_string()))
    }

    async fn next_completion(
        events: &mut broadcast::Receiver<SessionEvent>,
    ) -> (u64, Completion) {
        loop {
            let event = timeout(Duration::from_secs(5), events.recv())
                .await
                .expect("timed out waiting for completion")
                .expect("event channel closed");
            if let SessionEvent::Completed { token, completion } = event {
                return (token, completion);
            }
        }
    }

    #[tokio::test]
    async fn generate_is_non_blocking_and_resolves_to_result() {
        let (generator, script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator.clone());

        handle.upload(image_a()).await.unwrap();
        let token = handle.generate("corporate-grey").await.unwrap();
        let pending = handle.snapshot();
        assert!(pending.is_generating);
        assert_eq!(pending.phase, SessionPhase::Generating);
        assert_eq!(pending.selected_style_id.as_deref(), Some("corporate-grey"));

        script.send(Ok("X".to_string())).unwrap();
        let settled = timeout(Duration::from_secs(5), handle.wait_until_idle())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(settled.result_image_ref.as_deref(), Some("X"));
        assert!(settled.error_message.is_none());
        assert!(!settled.is_generating);
        assert!(token > 0);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert!(generator.instructions.lock().unwrap()[0].contains("neutral grey backdrop"));
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn failure_is_surfaced_verbatim() {
        let (generator, script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator);

        handle.upload(image_a()).await.unwrap();
        handle.generate("tech-office").await.unwrap();
        script
            .send(Err(GenerationFailure::new("rate limited")))
            .unwrap();
        let settled = handle.wait_until_idle().await.unwrap();
        assert_eq!(settled.error_message.as_deref(), Some("rate limited"));
        assert!(settled.result_image_ref.is_none());
        assert_eq!(settled.phase, SessionPhase::Ready);
    }

    #[tokio::test]
    async fn generate_without_upload_dispatches_nothing() {
        let (generator, _script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator.clone());

        let err = handle.generate("studio-light").await.unwrap_err();
        assert_eq!(err, SessionError::InvalidState);
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.error_message.as_deref(), Some(MISSING_IMAGE_MESSAGE));
        assert!(!snapshot.is_generating);
        tokio::task::yield_now().await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn second_generate_is_rejected_while_in_flight() {
        let (generator, script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator.clone());

        handle.upload(image_a()).await.unwrap();
        handle.generate("studio-light").await.unwrap();
        let err = handle.generate("cafe-meeting").await.unwrap_err();
        assert_eq!(err, SessionError::AlreadyGenerating);

        script.send(Ok("only".to_string())).unwrap();
        let settled = handle.wait_until_idle().await.unwrap();
        assert_eq!(settled.result_image_ref.as_deref(), Some("only"));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_result_after_reset_is_not_observable() {
        let (generator, script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator);
        let mut events = handle.events();

        handle.upload(image_a()).await.unwrap();
        let token = handle.generate("corporate-grey").await.unwrap();
        handle.reset().await.unwrap();
        assert_eq!(handle.snapshot(), SessionState::default().snapshot());

        script.send(Ok("late".to_string())).unwrap();
        let (completed_token, completion) = next_completion(&mut events).await;
        assert_eq!(completed_token, token);
        assert_eq!(completion, Completion::Stale);
        assert_eq!(handle.snapshot(), SessionState::default().snapshot());
    }

    #[tokio::test]
    async fn late_failure_after_reupload_does_not_clobber_new_session() {
        let (generator, script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator);
        let mut events = handle.events();

        handle.upload(image_a()).await.unwrap();
        handle.generate("corporate-grey").await.unwrap();
        let second_image = UploadedImage::new(vec![9; 4], "image/webp".to_string(), None);
        handle.upload(second_image).await.unwrap();

        script
            .send(Err(GenerationFailure::new("rate limited")))
            .unwrap();
        let (_, completion) = next_completion(&mut events).await;
        assert_eq!(completion, Completion::Stale);

        let snapshot = handle.snapshot();
        assert!(snapshot.error_message.is_none());
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(
            snapshot.uploaded_image.map(|image| image.mime_type),
            Some("image/webp".to_string())
        );
    }

    #[tokio::test]
    async fn commands_fail_after_shutdown() {
        let (generator, _script) = ScriptedGenerator::new();
        let handle = SessionRuntime::spawn(generator);
        handle.shutdown().await;
        let mut closed = false;
        for _ in 0..10 {
            if handle.reset().await == Err(SessionError::RuntimeClosed) {
                closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }
}
